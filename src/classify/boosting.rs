use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, MaxFeatures, TreeParams};
use super::{check_fit_input, Classifier};
use crate::error::{DichotError, Result};

/// Floor for class priors so an absent class gets a finite initial score.
const MIN_PRIOR: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub subsample: f64,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for BoostingParams {
    fn default() -> Self {
        BoostingParams {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            subsample: 1.0,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
        }
    }
}

impl BoostingParams {
    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: Some(self.max_depth),
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

/// Gradient boosted regression trees on the multinomial deviance.
///
/// Binary problems keep a single logistic score; otherwise each stage
/// holds one tree per class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub params: BoostingParams,
    n_classes: usize,
    init: Vec<f64>,
    stages: Vec<Vec<DecisionTree>>,
}

fn sigmoid(v: f64) -> f64 {
    if v >= 0.0 {
        1.0 / (1.0 + (-v).exp())
    } else {
        let e = v.exp();
        e / (1.0 + e)
    }
}

/// Row-wise softmax of raw scores, in place.
fn softmax_rows(scores: &mut Array2<f64>) {
    for mut row in scores.rows_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row /= total;
    }
}

impl GradientBoosting {
    pub fn new(params: BoostingParams) -> Self {
        GradientBoosting {
            params,
            n_classes: 0,
            init: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }

    /// Number of score columns: one for binary problems, K otherwise.
    fn n_scores(&self) -> usize {
        if self.n_classes == 2 {
            1
        } else {
            self.n_classes
        }
    }

    /// Raw additive scores, shape `(n_samples, n_scores)`.
    fn raw_scores(&self, x: &Array2<f64>) -> Array2<f64> {
        let k = self.n_scores();
        let mut scores = Array2::<f64>::zeros((x.nrows(), k));
        for (i, row) in x.rows().into_iter().enumerate() {
            for (j, init) in self.init.iter().enumerate() {
                scores[[i, j]] = *init;
            }
            for stage in &self.stages {
                for (j, tree) in stage.iter().enumerate() {
                    scores[[i, j]] += self.params.learning_rate * tree.predict_row(row)[0];
                }
            }
        }
        scores
    }

    /// Probabilities from raw scores.
    fn scores_to_proba(&self, scores: &Array2<f64>) -> Array2<f64> {
        if self.n_classes == 2 {
            let mut proba = Array2::<f64>::zeros((scores.nrows(), 2));
            for (i, s) in scores.column(0).iter().enumerate() {
                let p = sigmoid(*s);
                proba[[i, 0]] = 1.0 - p;
                proba[[i, 1]] = p;
            }
            proba
        } else {
            let mut proba = scores.clone();
            softmax_rows(&mut proba);
            proba
        }
    }

    fn in_bag(&self, n: usize, rng: &mut StdRng) -> Vec<usize> {
        if self.params.subsample >= 1.0 {
            return (0..n).collect();
        }
        let k = ((n as f64 * self.params.subsample).round() as usize).clamp(1, n);
        let mut picked = index::sample(rng, n, k).into_vec();
        picked.sort_unstable();
        picked
    }
}

impl Classifier for GradientBoosting {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        weights: Option<&[f64]>,
        rng: &mut StdRng,
    ) -> Result<()> {
        check_fit_input(x, y, n_classes, weights)?;
        if n_classes < 2 {
            return Err(DichotError::InvalidData(
                "gradient boosting needs at least two classes".into(),
            ));
        }
        if !(self.params.subsample > 0.0 && self.params.subsample <= 1.0) {
            return Err(DichotError::Config(format!(
                "subsample must be in (0, 1], got {}",
                self.params.subsample
            )));
        }
        let n = x.nrows();
        let ones = vec![1.0; n];
        let w = weights.unwrap_or(&ones);
        let total_w: f64 = w.iter().sum();

        let mut priors = vec![0.0; n_classes];
        for (&c, &wi) in y.iter().zip(w) {
            priors[c] += wi;
        }
        priors.iter_mut().for_each(|p| *p = (*p / total_w).max(MIN_PRIOR));

        self.n_classes = n_classes;
        self.init = if n_classes == 2 {
            vec![(priors[1] / priors[0]).ln()]
        } else {
            priors.iter().map(|p| p.ln()).collect()
        };
        self.stages.clear();

        let k = self.n_scores();
        let mut scores = Array2::<f64>::zeros((n, k));
        for mut row in scores.rows_mut() {
            for (j, init) in self.init.iter().enumerate() {
                row[j] = *init;
            }
        }

        let tree_params = self.params.tree_params();
        let factor = if k == 1 {
            1.0
        } else {
            (k as f64 - 1.0) / k as f64
        };

        for _ in 0..self.params.n_estimators {
            let proba = if k == 1 {
                scores.mapv(sigmoid)
            } else {
                let mut p = scores.clone();
                softmax_rows(&mut p);
                p
            };
            let bag = self.in_bag(n, rng);
            let mut stage = Vec::with_capacity(k);

            for j in 0..k {
                let target_class = if k == 1 { 1 } else { j };
                let residual: Vec<f64> = (0..n)
                    .map(|i| f64::from(u8::from(y[i] == target_class)) - proba[[i, j]])
                    .collect();
                let mut tree = DecisionTree::fit_regressor(
                    tree_params.clone(),
                    x,
                    &residual,
                    w,
                    bag.clone(),
                    rng,
                )?;

                // Newton step per leaf.
                let mut sums: std::collections::BTreeMap<usize, (f64, f64)> =
                    std::collections::BTreeMap::new();
                for &i in &bag {
                    let leaf = tree.apply(x.row(i));
                    let r = residual[i];
                    let entry = sums.entry(leaf).or_insert((0.0, 0.0));
                    entry.0 += w[i] * r;
                    entry.1 += w[i] * r.abs() * (1.0 - r.abs());
                }
                for (leaf, (num, den)) in sums {
                    let value = if den.abs() < 1e-150 {
                        0.0
                    } else {
                        factor * num / den
                    };
                    tree.set_leaf_value(leaf, vec![value]);
                }

                for (i, row) in x.rows().into_iter().enumerate() {
                    scores[[i, j]] += self.params.learning_rate * tree.predict_row(row)[0];
                }
                stage.push(tree);
            }
            self.stages.push(stage);
        }

        log::debug!(
            "boosted {} stages x {k} trees on {n} samples",
            self.stages.len()
        );
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.init.is_empty() {
            return Err(DichotError::NotFitted("gradient boosting".into()));
        }
        Ok(self.scores_to_proba(&self.raw_scores(x)))
    }

    /// Raw scores, one column per class (binary: `[-f, f]`).
    fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.init.is_empty() {
            return Err(DichotError::NotFitted("gradient boosting".into()));
        }
        let scores = self.raw_scores(x);
        if self.n_classes == 2 {
            let mut out = Array2::<f64>::zeros((scores.nrows(), 2));
            for (i, s) in scores.column(0).iter().enumerate() {
                out[[i, 0]] = -s;
                out[[i, 1]] = *s;
            }
            Ok(out)
        } else {
            Ok(scores)
        }
    }
}
