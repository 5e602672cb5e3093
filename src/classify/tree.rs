//! CART decision trees on weighted samples

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use crate::error::{DichotError, Result};

/// Minimum impurity improvement for a split to be kept.
const MIN_IMPROVEMENT: f64 = 1e-12;

/// Number of candidate features examined at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    Fraction(f64),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => n.sqrt() as usize,
            MaxFeatures::Log2 => n.log2() as usize,
            MaxFeatures::Fraction(f) => (n * f) as usize,
        };
        k.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// What the tree is asked to predict.
enum Target<'a> {
    /// Class index per sample; leaves hold class distributions.
    Classes { y: &'a [usize], n_classes: usize },
    /// Continuous value per sample; leaves hold the weighted mean.
    Values(&'a [f64]),
}

/// A fitted binary tree. Samples with `x[feature] <= threshold` go left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub params: TreeParams,
    nodes: Vec<Node>,
}

struct Builder<'a> {
    x: &'a Array2<f64>,
    target: Target<'a>,
    weights: &'a [f64],
    params: &'a TreeParams,
    n_try: usize,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Fit a Gini classification tree on the rows listed in `samples`.
    pub fn fit_classifier(
        params: TreeParams,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        weights: &[f64],
        samples: Vec<usize>,
        rng: &mut StdRng,
    ) -> Result<Self> {
        Self::build(params, x, Target::Classes { y, n_classes }, weights, samples, rng)
    }

    /// Fit a squared-error regression tree on the rows listed in `samples`.
    pub fn fit_regressor(
        params: TreeParams,
        x: &Array2<f64>,
        targets: &[f64],
        weights: &[f64],
        samples: Vec<usize>,
        rng: &mut StdRng,
    ) -> Result<Self> {
        Self::build(params, x, Target::Values(targets), weights, samples, rng)
    }

    fn build(
        params: TreeParams,
        x: &Array2<f64>,
        target: Target<'_>,
        weights: &[f64],
        samples: Vec<usize>,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if samples.is_empty() {
            return Err(DichotError::InvalidData(
                "cannot grow a tree from zero samples".into(),
            ));
        }
        let n_try = params.max_features.resolve(x.ncols());
        let mut builder = Builder {
            x,
            target,
            weights,
            params: &params,
            n_try,
            rng,
            nodes: Vec::new(),
        };
        builder.grow(samples, 0);
        let nodes = builder.nodes;
        Ok(DecisionTree { params, nodes })
    }

    /// Index of the leaf reached by `row`.
    pub fn apply(&self, row: ArrayView1<'_, f64>) -> usize {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => return idx,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Leaf value reached by `row`.
    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> &[f64] {
        match &self.nodes[self.apply(row)] {
            Node::Leaf { value } => value,
            Node::Split { .. } => &[],
        }
    }

    /// Overwrite a leaf's value (gradient boosting line search).
    pub fn set_leaf_value(&mut self, leaf: usize, value: Vec<f64>) {
        if let Some(Node::Leaf { value: v }) = self.nodes.get_mut(leaf) {
            *v = value;
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Builder<'_> {
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.leaf_value(&samples),
        });

        let at_depth = self.params.max_depth.is_some_and(|d| depth >= d);
        if at_depth
            || samples.len() < self.params.min_samples_split
            || samples.len() < 2 * self.params.min_samples_leaf
        {
            return id;
        }
        let parent = self.impurity(&samples);
        if parent <= MIN_IMPROVEMENT {
            return id;
        }

        let Some(best) = self.best_split(&samples) else {
            return id;
        };
        if best.impurity >= parent - MIN_IMPROVEMENT {
            return id;
        }

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.x[[i, best.feature]] <= best.threshold);
        let left_id = self.grow(left, depth + 1);
        let right_id = self.grow(right, depth + 1);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left_id,
            right: right_id,
        };
        id
    }

    fn leaf_value(&self, samples: &[usize]) -> Vec<f64> {
        match &self.target {
            Target::Classes { y, n_classes } => {
                let mut dist = vec![0.0; *n_classes];
                for &i in samples {
                    dist[y[i]] += self.weights[i];
                }
                let total: f64 = dist.iter().sum();
                if total > 0.0 {
                    dist.iter_mut().for_each(|d| *d /= total);
                }
                dist
            }
            Target::Values(t) => {
                let (sw, swy) = samples.iter().fold((0.0, 0.0), |(sw, swy), &i| {
                    (sw + self.weights[i], swy + self.weights[i] * t[i])
                });
                vec![if sw > 0.0 { swy / sw } else { 0.0 }]
            }
        }
    }

    /// Weighted impurity of a node (Gini × weight, or sum of squared errors).
    fn impurity(&self, samples: &[usize]) -> f64 {
        let mut stats = Stats::new(&self.target);
        for &i in samples {
            stats.add(&self.target, i, self.weights[i]);
        }
        stats.impurity()
    }

    fn best_split(&mut self, samples: &[usize]) -> Option<BestSplit> {
        let n_features = self.x.ncols();
        let candidates: Vec<usize> = if self.n_try >= n_features {
            (0..n_features).collect()
        } else {
            index::sample(&mut *self.rng, n_features, self.n_try).into_vec()
        };

        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;
        let mut order = samples.to_vec();

        let mut total = Stats::new(&self.target);
        for &i in samples {
            total.add(&self.target, i, self.weights[i]);
        }

        for feature in candidates {
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let mut left = Stats::new(&self.target);
            let mut right = total.clone();

            for pos in 0..order.len() - 1 {
                let i = order[pos];
                let w = self.weights[i];
                left.add(&self.target, i, w);
                right.remove(&self.target, i, w);

                let n_left = pos + 1;
                if n_left < min_leaf || order.len() - n_left < min_leaf {
                    continue;
                }
                let lo = self.x[[i, feature]];
                let hi = self.x[[order[pos + 1], feature]];
                if hi <= lo {
                    continue;
                }
                let impurity = left.impurity() + right.impurity();
                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    let mut threshold = lo + (hi - lo) / 2.0;
                    if threshold >= hi || !threshold.is_finite() {
                        threshold = lo;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        impurity,
                    });
                }
            }
        }
        best
    }
}

/// Running sufficient statistics for one side of a split.
#[derive(Clone)]
enum Stats {
    Classes { counts: Vec<f64>, weight: f64 },
    Values { weight: f64, sum: f64, sum_sq: f64 },
}

impl Stats {
    fn new(target: &Target<'_>) -> Self {
        match target {
            Target::Classes { n_classes, .. } => Stats::Classes {
                counts: vec![0.0; *n_classes],
                weight: 0.0,
            },
            Target::Values(_) => Stats::Values {
                weight: 0.0,
                sum: 0.0,
                sum_sq: 0.0,
            },
        }
    }

    fn add(&mut self, target: &Target<'_>, i: usize, w: f64) {
        self.update(target, i, w);
    }

    fn remove(&mut self, target: &Target<'_>, i: usize, w: f64) {
        self.update(target, i, -w);
    }

    fn update(&mut self, target: &Target<'_>, i: usize, w: f64) {
        match (self, target) {
            (Stats::Classes { counts, weight }, Target::Classes { y, .. }) => {
                counts[y[i]] += w;
                *weight += w;
            }
            (Stats::Values { weight, sum, sum_sq }, Target::Values(t)) => {
                *weight += w;
                *sum += w * t[i];
                *sum_sq += w * t[i] * t[i];
            }
            _ => {}
        }
    }

    fn impurity(&self) -> f64 {
        match self {
            Stats::Classes { counts, weight } => {
                if *weight <= 0.0 {
                    return 0.0;
                }
                let sum_sq: f64 = counts.iter().map(|c| (c / weight).powi(2)).sum();
                (weight * (1.0 - sum_sq)).max(0.0)
            }
            Stats::Values {
                weight,
                sum,
                sum_sq,
            } => {
                if *weight <= 0.0 {
                    return 0.0;
                }
                (sum_sq - sum * sum / weight).max(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn separates_two_classes_with_one_split() {
        let x = array![[0.0, 5.0], [1.0, 5.0], [2.0, 5.0], [10.0, 5.0], [11.0, 5.0]];
        let y = [0, 0, 0, 1, 1];
        let w = [1.0; 5];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = DecisionTree::fit_classifier(
            TreeParams::default(),
            &x,
            &y,
            2,
            &w,
            (0..5).collect(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.predict_row(array![1.5, 0.0].view()), &[1.0, 0.0]);
        assert_eq!(tree.predict_row(array![9.0, 0.0].view()), &[0.0, 1.0]);
        // threshold is the midpoint between 2 and 10
        assert_eq!(tree.predict_row(array![6.0, 0.0].view()), &[1.0, 0.0]);
        assert_eq!(tree.predict_row(array![6.1, 0.0].view()), &[0.0, 1.0]);
    }

    #[test]
    fn max_depth_limits_growth() {
        let x = Array2::from_shape_fn((16, 1), |(i, _)| i as f64);
        let y: Vec<usize> = (0..16).map(|i| i % 2).collect();
        let w = vec![1.0; 16];
        let params = TreeParams {
            max_depth: Some(2),
            ..TreeParams::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let tree =
            DecisionTree::fit_classifier(params, &x, &y, 2, &w, (0..16).collect(), &mut rng)
                .unwrap();
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn regression_leaves_hold_weighted_means() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let t = [1.0, 1.0, 5.0, 7.0];
        let w = [1.0, 1.0, 1.0, 3.0];
        let params = TreeParams {
            max_depth: Some(1),
            ..TreeParams::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let tree =
            DecisionTree::fit_regressor(params, &x, &t, &w, (0..4).collect(), &mut rng).unwrap();
        assert_eq!(tree.predict_row(array![0.5].view()), &[1.0]);
        assert_eq!(tree.predict_row(array![2.5].view()), &[6.5]);
    }

    #[test]
    fn weights_shift_leaf_distribution() {
        let x = array![[0.0], [0.0], [0.0]];
        let y = [0, 1, 1];
        let w = [2.0, 1.0, 1.0];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = DecisionTree::fit_classifier(
            TreeParams::default(),
            &x,
            &y,
            2,
            &w,
            vec![0, 1, 2],
            &mut rng,
        )
        .unwrap();
        // identical features cannot be split
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.predict_row(array![0.0].view()), &[0.5, 0.5]);
    }

    #[test]
    fn min_samples_leaf_is_respected() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y: Vec<usize> = (0..10).map(|i| usize::from(i == 9)).collect();
        let w = vec![1.0; 10];
        let params = TreeParams {
            min_samples_leaf: 3,
            ..TreeParams::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let tree =
            DecisionTree::fit_classifier(params, &x, &y, 2, &w, (0..10).collect(), &mut rng)
                .unwrap();
        // the lone positive cannot be isolated
        let leaf = tree.predict_row(array![9.0].view());
        assert!(leaf[1] < 1.0);
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(100), 10);
        assert_eq!(MaxFeatures::Log2.resolve(64), 6);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
        assert_eq!(MaxFeatures::Fraction(0.01).resolve(10), 1);
    }
}
