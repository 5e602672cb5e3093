//! Classification models
//!
//! Provides the estimators used by the CCB-ID ensemble:
//! - CART decision trees (classification and regression)
//! - Random forests
//! - Gradient boosting with multinomial deviance
//! - Sigmoid (Platt) probability calibration
//!
//! Estimators are described by an [`EstimatorSpec`], which is what users
//! write to disk to swap in their own model configuration.

pub mod boosting;
pub mod calibration;
pub mod forest;
pub mod tree;

use std::path::Path;

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub use boosting::{BoostingParams, GradientBoosting};
pub use calibration::{Sigmoid, SigmoidCalibrated};
pub use forest::{ForestParams, RandomForest};
pub use tree::{DecisionTree, MaxFeatures, TreeParams};

use crate::error::{DichotError, Result};

/// Common interface of every fitted/fittable estimator.
pub trait Classifier {
    /// Fit on `x` with class indices `y` in `0..n_classes`.
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        weights: Option<&[f64]>,
        rng: &mut StdRng,
    ) -> Result<()>;

    /// Class probabilities, shape `(n_samples, n_classes)`.
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Per-class confidence scores used for calibration.
    fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.predict_proba(x)
    }

    /// Most probable class index per sample.
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        Ok(argmax_rows(&self.predict_proba(x)?))
    }
}

/// Index of the largest value in each row (first one on ties).
pub fn argmax_rows(proba: &Array2<f64>) -> Vec<usize> {
    proba
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

pub(crate) fn check_fit_input(
    x: &Array2<f64>,
    y: &[usize],
    n_classes: usize,
    weights: Option<&[f64]>,
) -> Result<()> {
    if x.nrows() == 0 {
        return Err(DichotError::InvalidData("no training samples".into()));
    }
    if y.len() != x.nrows() {
        return Err(DichotError::shape(
            format!("{} labels", x.nrows()),
            format!("{} labels", y.len()),
        ));
    }
    if let Some(w) = weights {
        if w.len() != x.nrows() {
            return Err(DichotError::shape(
                format!("{} sample weights", x.nrows()),
                format!("{} sample weights", w.len()),
            ));
        }
    }
    if let Some(bad) = y.iter().find(|&&c| c >= n_classes) {
        return Err(DichotError::InvalidData(format!(
            "class index {bad} out of range for {n_classes} classes"
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(DichotError::InvalidData(
            "training features contain NaN or infinite values".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// EstimatorSpec – serializable model description
// ---------------------------------------------------------------------------

/// Hyperparameters for one estimator. Stored as JSON or TOML with a `kind`
/// tag, e.g. `{"kind": "random_forest", "n_estimators": 300}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatorSpec {
    GradientBoosting(BoostingParams),
    RandomForest(ForestParams),
}

impl EstimatorSpec {
    /// The default pair: gradient boosting then random forest.
    pub fn defaults() -> Vec<EstimatorSpec> {
        vec![
            EstimatorSpec::GradientBoosting(BoostingParams::default()),
            EstimatorSpec::RandomForest(ForestParams::default()),
        ]
    }

    /// A fresh, unfitted estimator.
    pub fn build(&self) -> Estimator {
        match self {
            EstimatorSpec::GradientBoosting(p) => {
                Estimator::GradientBoosting(GradientBoosting::new(p.clone()))
            }
            EstimatorSpec::RandomForest(p) => Estimator::RandomForest(RandomForest::new(p.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EstimatorSpec::GradientBoosting(_) => "gradient_boosting",
            EstimatorSpec::RandomForest(_) => "random_forest",
        }
    }

    /// Threads used while fitting. Only forests parallelise.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        if let EstimatorSpec::RandomForest(p) = &mut self {
            p.n_jobs = jobs.max(1);
        }
        self
    }

    /// Read a spec from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Ok(toml::from_str(&text)?),
            _ => Ok(serde_json::from_str(&text)?),
        }
    }
}

// ---------------------------------------------------------------------------
// Estimator – a concrete model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    GradientBoosting(GradientBoosting),
    RandomForest(RandomForest),
}

impl Classifier for Estimator {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        weights: Option<&[f64]>,
        rng: &mut StdRng,
    ) -> Result<()> {
        match self {
            Estimator::GradientBoosting(m) => m.fit(x, y, n_classes, weights, rng),
            Estimator::RandomForest(m) => m.fit(x, y, n_classes, weights, rng),
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Estimator::GradientBoosting(m) => m.predict_proba(x),
            Estimator::RandomForest(m) => m.predict_proba(x),
        }
    }

    fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Estimator::GradientBoosting(m) => m.decision_function(x),
            Estimator::RandomForest(m) => m.decision_function(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn argmax_takes_first_on_ties() {
        let p = array![[0.2, 0.5, 0.3], [0.4, 0.4, 0.2], [0.0, 0.0, 1.0]];
        assert_eq!(argmax_rows(&p), vec![1, 0, 2]);
    }

    #[test]
    fn spec_round_trips_through_json_and_toml() {
        let json = r#"{"kind": "random_forest", "n_estimators": 25, "max_features": "log2"}"#;
        let spec: EstimatorSpec = serde_json::from_str(json).unwrap();
        match &spec {
            EstimatorSpec::RandomForest(p) => {
                assert_eq!(p.n_estimators, 25);
                assert_eq!(p.max_features, MaxFeatures::Log2);
                assert!(p.bootstrap);
            }
            other => panic!("unexpected spec {other:?}"),
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gbc.toml");
        std::fs::write(&path, "kind = \"gradient_boosting\"\nlearning_rate = 0.05\n").unwrap();
        match EstimatorSpec::load(&path).unwrap() {
            EstimatorSpec::GradientBoosting(p) => {
                assert_eq!(p.learning_rate, 0.05);
                assert_eq!(p.n_estimators, 100);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn check_fit_input_rejects_bad_labels() {
        let x = array![[1.0], [2.0]];
        assert!(check_fit_input(&x, &[0, 2], 2, None).is_err());
        assert!(check_fit_input(&x, &[0], 2, None).is_err());
        assert!(check_fit_input(&x, &[0, 1], 2, Some(&[1.0])).is_err());
        assert!(check_fit_input(&x, &[0, 1], 2, None).is_ok());
    }
}
