//! The CCB-ID ensemble: several classifiers, optionally calibrated, whose
//! probabilities are averaged.

use ndarray::Array2;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::classify::{argmax_rows, Classifier, Estimator, EstimatorSpec, SigmoidCalibrated};
use crate::data::Label;
use crate::error::{DichotError, Result};
use crate::reduce::Pca;

/// Output of [`Ensemble::predict_proba`].
#[derive(Debug, Clone)]
pub enum Probabilities {
    /// Mean over models, shape `(n_samples, n_classes)`.
    Averaged(Array2<f64>),
    /// One `(n_samples, n_classes)` array per model.
    PerModel(Vec<Array2<f64>>),
}

impl Probabilities {
    /// The averaged array, averaging on the fly if needed.
    pub fn into_mean(self) -> Array2<f64> {
        match self {
            Probabilities::Averaged(p) => p,
            Probabilities::PerModel(all) => mean_of(&all),
        }
    }
}

fn mean_of(all: &[Array2<f64>]) -> Array2<f64> {
    let mut iter = all.iter();
    let Some(first) = iter.next() else {
        return Array2::zeros((0, 0));
    };
    let mut total = first.clone();
    for p in iter {
        total += p;
    }
    total / all.len() as f64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ensemble {
    pub specs: Vec<EstimatorSpec>,
    pub models: Vec<Estimator>,
    pub calibrated: Vec<SigmoidCalibrated>,
    pub average_proba: bool,
    /// Species label of each class index.
    pub labels: Option<Vec<Label>>,
    /// Good-band mask applied to raw spectra before the reducer.
    pub good_bands: Option<Vec<bool>>,
    pub reducer: Option<Pca>,
    /// Reduced features kept as model input.
    pub n_features: Option<usize>,
    pub n_classes: usize,
    pub is_calibrated: bool,
    #[serde(default)]
    fitted: bool,
}

impl Default for Ensemble {
    fn default() -> Self {
        Ensemble::new(Vec::new())
    }
}

impl Ensemble {
    /// Build an unfitted ensemble. No specs means gradient boosting plus a
    /// random forest.
    pub fn new(specs: Vec<EstimatorSpec>) -> Self {
        let specs = if specs.is_empty() {
            EstimatorSpec::defaults()
        } else {
            specs
        };
        let models = specs.iter().map(EstimatorSpec::build).collect();
        Ensemble {
            specs,
            models,
            calibrated: Vec::new(),
            average_proba: true,
            labels: None,
            good_bands: None,
            reducer: None,
            n_features: None,
            n_classes: 0,
            is_calibrated: false,
            fitted: false,
        }
    }

    pub fn n_models(&self) -> usize {
        self.models.len()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Fit every model on the same data.
    pub fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        weights: Option<&[f64]>,
        rng: &mut StdRng,
    ) -> Result<()> {
        let n_classes = y.iter().max().map_or(0, |m| m + 1);
        let n_classes = match &self.labels {
            Some(labels) if labels.len() >= n_classes => labels.len(),
            _ => n_classes,
        };
        for (spec, model) in self.specs.iter().zip(self.models.iter_mut()) {
            log::info!("fitting {} on {} samples", spec.name(), x.nrows());
            model.fit(x, y, n_classes, weights, rng)?;
        }
        if self.labels.is_none() {
            self.labels = Some(
                (0..n_classes)
                    .map(|c| Label::Text(format!("SP-{c}")))
                    .collect(),
            );
        }
        self.n_classes = n_classes;
        self.fitted = true;
        Ok(())
    }

    /// Sigmoid-calibrate every model with `n_folds` cross-validation.
    pub fn calibrate(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_folds: usize,
        rng: &mut StdRng,
    ) -> Result<()> {
        let n_classes = if self.n_classes > 0 {
            self.n_classes
        } else {
            y.iter().max().map_or(0, |m| m + 1)
        };
        let mut calibrated = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            log::info!("calibrating {} with {n_folds}-fold sigmoid", spec.name());
            calibrated.push(SigmoidCalibrated::fit(spec, x, y, n_classes, n_folds, rng)?);
        }
        self.calibrated = calibrated;
        self.n_classes = n_classes;
        self.is_calibrated = true;
        Ok(())
    }

    fn check_ready(&self, use_calibrated: bool) -> Result<()> {
        if use_calibrated && !self.is_calibrated {
            return Err(DichotError::NotFitted(
                "calibrated predictions requested before calibration".into(),
            ));
        }
        if !use_calibrated && !self.fitted {
            return Err(DichotError::NotFitted("ensemble models".into()));
        }
        Ok(())
    }

    /// Predicted class index per sample, one column per model.
    pub fn predict(&self, x: &Array2<f64>, use_calibrated: bool) -> Result<Array2<usize>> {
        let per_model = match self.predict_proba(x, use_calibrated, Some(false))? {
            Probabilities::PerModel(all) => all,
            Probabilities::Averaged(p) => vec![p],
        };
        let mut out = Array2::<usize>::zeros((x.nrows(), per_model.len()));
        for (j, proba) in per_model.iter().enumerate() {
            for (i, c) in argmax_rows(proba).into_iter().enumerate() {
                out[[i, j]] = c;
            }
        }
        Ok(out)
    }

    /// Class probabilities. `average` overrides the ensemble's
    /// `average_proba` setting for this call.
    pub fn predict_proba(
        &self,
        x: &Array2<f64>,
        use_calibrated: bool,
        average: Option<bool>,
    ) -> Result<Probabilities> {
        self.check_ready(use_calibrated)?;
        let per_model: Vec<Array2<f64>> = if use_calibrated {
            self.calibrated
                .iter()
                .map(|m| m.predict_proba(x))
                .collect::<Result<_>>()?
        } else {
            self.models
                .iter()
                .map(|m| m.predict_proba(x))
                .collect::<Result<_>>()?
        };
        if average.unwrap_or(self.average_proba) {
            Ok(Probabilities::Averaged(mean_of(&per_model)))
        } else {
            Ok(Probabilities::PerModel(per_model))
        }
    }

    /// Replace each model's hyperparameters. Refitting is required after.
    pub fn set_params(&mut self, specs: Vec<EstimatorSpec>) -> Result<()> {
        if specs.len() != self.specs.len() {
            return Err(DichotError::shape(
                format!("{} parameter sets", self.specs.len()),
                format!("{} parameter sets", specs.len()),
            ));
        }
        self.models = specs.iter().map(EstimatorSpec::build).collect();
        self.specs = specs;
        self.calibrated.clear();
        self.is_calibrated = false;
        self.fitted = false;
        Ok(())
    }
}
