use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, MaxFeatures, TreeParams};
use super::{check_fit_input, Classifier};
use crate::error::{DichotError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    /// Worker threads used to grow trees.
    pub n_jobs: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            n_jobs: 1,
        }
    }
}

impl ForestParams {
    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

/// Bagged ensemble of Gini trees; probabilities are the mean of the trees'
/// leaf distributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub params: ForestParams,
    n_classes: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        RandomForest {
            params,
            n_classes: 0,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn grow_tree(
        &self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        weights: &[f64],
        seed: u64,
    ) -> Result<DecisionTree> {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = x.nrows();
        let (samples, tree_weights) = if self.params.bootstrap {
            let mut counts = vec![0usize; n];
            for _ in 0..n {
                counts[rng.gen_range(0..n)] += 1;
            }
            let samples: Vec<usize> = (0..n).filter(|&i| counts[i] > 0).collect();
            let w: Vec<f64> = weights
                .iter()
                .zip(&counts)
                .map(|(w, &c)| w * c as f64)
                .collect();
            (samples, w)
        } else {
            ((0..n).collect(), weights.to_vec())
        };
        DecisionTree::fit_classifier(
            self.params.tree_params(),
            x,
            y,
            n_classes,
            &tree_weights,
            samples,
            &mut rng,
        )
    }
}

impl Classifier for RandomForest {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        weights: Option<&[f64]>,
        rng: &mut StdRng,
    ) -> Result<()> {
        check_fit_input(x, y, n_classes, weights)?;
        if self.params.n_estimators == 0 {
            return Err(DichotError::Config(
                "random forest needs at least one tree".into(),
            ));
        }
        let ones = vec![1.0; x.nrows()];
        let weights = weights.unwrap_or(&ones);

        // Seeds are drawn up front so the result does not depend on n_jobs.
        let seeds: Vec<u64> = (0..self.params.n_estimators).map(|_| rng.gen()).collect();
        let jobs = self.params.n_jobs.clamp(1, seeds.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| DichotError::Config(format!("building tree thread pool: {e}")))?;

        let this = &*self;
        let trees = pool.install(|| {
            seeds
                .par_iter()
                .map(|&seed| this.grow_tree(x, y, n_classes, weights, seed))
                .collect::<Result<Vec<_>>>()
        })?;

        log::debug!(
            "grew {} trees on {} samples using {jobs} threads",
            trees.len(),
            x.nrows()
        );
        self.trees = trees;
        self.n_classes = n_classes;
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.trees.is_empty() {
            return Err(DichotError::NotFitted("random forest".into()));
        }
        let mut proba = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        for (i, row) in x.rows().into_iter().enumerate() {
            for tree in &self.trees {
                for (k, p) in tree.predict_row(row).iter().enumerate() {
                    proba[[i, k]] += p;
                }
            }
        }
        proba /= self.trees.len() as f64;
        Ok(proba)
    }
}
