//! End-to-end training and application flows behind `dc-train` / `dc-apply`

use std::path::{Path, PathBuf};

use ndarray::{s, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bundle::ModelBundle;
use crate::config::{AggregateMethod, OutlierMethod, Settings};
use crate::crown;
use crate::data::{filter, unique_sorted, BandTable, Label, SpeciesTable, SpectralTable};
use crate::ensemble::{Ensemble, Probabilities};
use crate::error::{DichotError, Result};
use crate::labels::{encode, match_species_ids, sample_weights};
use crate::metrics::{model_report, Score};
use crate::{outliers, reduce, resample, split, write};

/// Everything `train` reads.
#[derive(Debug, Clone)]
pub struct TrainInputs {
    pub spectra: SpectralTable,
    pub species: SpeciesTable,
    pub bands: Option<BandTable>,
    /// Saved reducer to refit instead of a fresh PCA.
    pub reducer_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub bundle: ModelBundle,
    /// Hold-out scores, empty when no samples were held out.
    pub report: Vec<Score>,
    pub n_outliers: usize,
    pub n_train: usize,
    pub n_test: usize,
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

fn keep_columns(x: Array2<f64>, n: usize) -> Array2<f64> {
    if n < x.ncols() {
        x.slice(s![.., ..n]).to_owned()
    } else {
        x
    }
}

/// Fit the full CCB-ID model from labelled spectra.
pub fn train(inputs: &TrainInputs, settings: &Settings) -> Result<TrainOutcome> {
    settings.validate()?;
    let mut rng = make_rng(settings.seed);

    // good bands
    let bands = inputs
        .bands
        .clone()
        .unwrap_or_else(|| BandTable::all_good(inputs.spectra.n_bands()));
    let table = filter::good_bands(&inputs.spectra, &bands)?;
    log::info!(
        "using {} of {} bands for {} samples",
        table.n_bands(),
        inputs.spectra.n_bands(),
        table.len()
    );

    // species labels per sample
    let matched = match_species_ids(&table.crown_ids, &inputs.species);
    let labelled: Vec<bool> = matched.crown_labels.iter().map(Option::is_some).collect();
    let unlabelled = labelled.iter().filter(|l| !**l).count();
    if unlabelled > 0 {
        log::warn!("dropping {unlabelled} samples whose crown has no species entry");
    }
    let mut table = filter::rows(&table, &labelled)?;
    let mut labels: Vec<Label> = matched.crown_labels.into_iter().flatten().collect();
    if table.is_empty() {
        return Err(DichotError::InvalidData(
            "no training samples matched the species table".into(),
        ));
    }

    // outliers
    let mut n_outliers = 0;
    if let Some(OutlierMethod::Pca) = settings.remove_outliers {
        let mask = outliers::with_pca(
            &table.features,
            settings.outlier_components,
            settings.outlier_threshold,
        )?;
        n_outliers = mask.iter().filter(|k| !**k).count();
        log::info!("removed {n_outliers} outlier samples");
        labels = filter::take(&labels, &filter::mask_indices(&mask));
        table = filter::rows(&table, &mask)?;
    }

    // reduce
    let (reducer, reduced) = match &inputs.reducer_path {
        Some(path) => {
            log::info!("refitting reducer from {}", path.display());
            reduce::from_path(path, &table.features, Some(settings.n_features))?
        }
        None => reduce::pca(&table.features, settings.n_features)?,
    };
    let reduced = keep_columns(reduced, settings.n_features);
    let n_features = reduced.ncols();

    // split
    let classes = unique_sorted(&labels);
    if classes.len() < 2 {
        return Err(DichotError::InvalidData(format!(
            "need at least two species to train, found {}",
            classes.len()
        )));
    }
    let parts = split::train_test(
        &table.crown_ids,
        &labels,
        settings.split,
        settings.test_fraction,
        &mut rng,
    )?;
    log::info!(
        "split {} train / {} test samples by {:?}",
        parts.train.len(),
        parts.test.len(),
        settings.split
    );
    let x_train = reduced.select(Axis(0), &parts.train);
    let labels_train = filter::take(&labels, &parts.train);
    let y_train = encode(&labels_train, &classes)
        .ok_or_else(|| DichotError::InvalidData("unknown training label".into()))?;

    // balance
    let balanced = resample::uniform(&x_train, &labels_train, settings.n_per_class, &mut rng)?;
    let y_balanced = encode(&balanced.carry(&labels_train), &classes)
        .ok_or_else(|| DichotError::InvalidData("unknown resampled label".into()))?;
    let weights = sample_weights(&y_balanced);

    // fit and calibrate
    let mut ensemble = Ensemble::new(settings.model_specs());
    ensemble.labels = Some(classes.clone());
    ensemble.good_bands = Some(bands.good.clone());
    ensemble.reducer = Some(reducer);
    ensemble.n_features = Some(n_features);
    ensemble.fit(&balanced.x, &y_balanced, Some(&weights), &mut rng)?;
    if !settings.uncalibrated {
        ensemble.calibrate(&x_train, &y_train, settings.calibration_folds, &mut rng)?;
    }

    // hold-out report
    let mut report = Vec::new();
    if !parts.test.is_empty() {
        let x_test = reduced.select(Axis(0), &parts.test);
        let labels_test = filter::take(&labels, &parts.test);
        let crowns_test = filter::take(&table.crown_ids, &parts.test);
        let y_test = encode(&labels_test, &classes)
            .ok_or_else(|| DichotError::InvalidData("unknown test label".into()))?;
        report = holdout_report(&ensemble, &x_test, &y_test, &crowns_test, settings)?;
    }

    let species_names = classes
        .iter()
        .map(|c| inputs.species.name_of(c).unwrap_or("").to_string())
        .collect();
    let n_train = parts.train.len();
    let n_test = parts.test.len();
    Ok(TrainOutcome {
        bundle: ModelBundle::new(ensemble, settings.clone(), species_names),
        report,
        n_outliers,
        n_train,
        n_test,
    })
}

fn holdout_report(
    ensemble: &Ensemble,
    x: &Array2<f64>,
    y: &[usize],
    crowns: &[Label],
    settings: &Settings,
) -> Result<Vec<Score>> {
    let mut scores = Vec::new();
    let mut modes = vec![false];
    if ensemble.is_calibrated {
        modes.push(true);
    }
    for calibrated in modes {
        let suffix = if calibrated { "calibrated" } else { "uncalibrated" };
        let per_model = match ensemble.predict_proba(x, calibrated, Some(false))? {
            Probabilities::PerModel(all) => all,
            Probabilities::Averaged(mean) => vec![mean],
        };
        for (spec, proba) in ensemble.specs.iter().zip(&per_model) {
            scores.push(Score::from_proba(format!("{} {suffix}", spec.name()), y, proba));
        }
        let mean = Probabilities::PerModel(per_model).into_mean();
        scores.push(Score::from_proba(format!("ensemble {suffix}"), y, &mean));

        if let Some(AggregateMethod::Average) = settings.aggregate {
            let (ids, crown_proba) = crown::average(&mean, crowns)?;
            let crown_y = crown_truth(crowns, y, &ids);
            scores.push(Score::from_proba(
                format!("ensemble {suffix} crowns"),
                &crown_y,
                &crown_proba,
            ));
        }
    }
    Ok(scores)
}

/// Class of each crown, taken from its first sample.
fn crown_truth(crowns: &[Label], y: &[usize], ids: &[Label]) -> Vec<usize> {
    ids.iter()
        .map(|id| {
            crowns
                .iter()
                .position(|c| c == id)
                .map(|i| y[i])
                .unwrap_or(0)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    pub aggregate: Option<AggregateMethod>,
    pub use_calibrated: bool,
}

impl From<&Settings> for ApplyOptions {
    fn from(settings: &Settings) -> Self {
        ApplyOptions {
            aggregate: settings.aggregate,
            use_calibrated: !settings.uncalibrated,
        }
    }
}

impl ApplyOptions {
    /// Options for one application run: `settings` first, then `-e` turns
    /// on crown averaging, then explicit flags win.
    pub fn resolve(
        settings: &Settings,
        ecodse: bool,
        aggregate: Option<AggregateMethod>,
        uncalibrated: bool,
    ) -> Self {
        let mut options = ApplyOptions::from(settings);
        if ecodse {
            options.aggregate = Some(AggregateMethod::Average);
        }
        if aggregate.is_some() {
            options.aggregate = aggregate;
        }
        if uncalibrated {
            options.use_calibrated = false;
        }
        options
    }
}

/// Per-species probabilities for samples or crowns.
#[derive(Debug, Clone)]
pub struct Predictions {
    /// Crown id per row (per sample, or unique crowns when aggregated).
    pub ids: Vec<Label>,
    pub species: Vec<Label>,
    pub proba: Array2<f64>,
    pub aggregated: bool,
}

impl Predictions {
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if self.aggregated {
            write::predictions_csv(path, &self.ids, &self.species, &self.proba)
        } else {
            write::sample_predictions_csv(path, &self.ids, &self.species, &self.proba)
        }
    }

    /// Score predictions against known crown species, if any rows are
    /// covered by the table.
    pub fn evaluate(&self, species: &SpeciesTable, name: &str) -> Option<Score> {
        let matched = match_species_ids(&self.ids, species);
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for (i, label) in matched.crown_labels.iter().enumerate() {
            if let Some(class) = label.as_ref().and_then(|l| self.species.binary_search(l).ok()) {
                rows.push(i);
                y.push(class);
            }
        }
        if rows.is_empty() {
            return None;
        }
        let proba = self.proba.select(Axis(0), &rows);
        Some(Score::from_proba(name, &y, &proba))
    }
}

/// Project raw spectra into the model's feature space.
pub fn model_features(ensemble: &Ensemble, table: &SpectralTable) -> Result<Array2<f64>> {
    let x = match &ensemble.good_bands {
        Some(mask) => filter::select_columns(&table.features, mask)?,
        None => table.features.clone(),
    };
    let x = match &ensemble.reducer {
        Some(reducer) => reducer.transform(&x)?,
        None => x,
    };
    Ok(match ensemble.n_features {
        Some(n) => keep_columns(x, n),
        None => x,
    })
}

/// Predict species probabilities for unlabelled spectra.
pub fn apply(
    bundle: &ModelBundle,
    table: &SpectralTable,
    options: ApplyOptions,
) -> Result<Predictions> {
    let ensemble = &bundle.ensemble;
    let x = model_features(ensemble, table)?;

    let use_calibrated = if options.use_calibrated && !ensemble.is_calibrated {
        log::warn!("model has no calibrated estimators; using uncalibrated probabilities");
        false
    } else {
        options.use_calibrated
    };
    let proba = ensemble
        .predict_proba(&x, use_calibrated, Some(true))?
        .into_mean();
    let species = ensemble
        .labels
        .clone()
        .unwrap_or_else(|| (0..proba.ncols()).map(|c| Label::Text(format!("SP-{c}"))).collect());

    match options.aggregate {
        Some(AggregateMethod::Average) => {
            let (ids, crown_proba) = crown::average(&proba, &table.crown_ids)?;
            log::info!("averaged {} samples into {} crowns", table.len(), ids.len());
            Ok(Predictions {
                ids,
                species,
                proba: crown_proba,
                aggregated: true,
            })
        }
        None => Ok(Predictions {
            ids: table.crown_ids.clone(),
            species,
            proba,
            aggregated: false,
        }),
    }
}

/// Log every score in a report.
pub fn log_report(report: &[Score]) {
    for score in report {
        model_report(score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crown_truth_uses_first_sample() {
        let crowns = vec![Label::from(2), Label::from(1), Label::from(2)];
        let y = vec![1, 0, 1];
        assert_eq!(crown_truth(&crowns, &y, &[Label::from(1), Label::from(2)]), vec![0, 1]);
    }

    #[test]
    fn ecodse_forces_crown_averaging() {
        let settings = Settings::default();
        assert_eq!(ApplyOptions::resolve(&settings, false, None, false).aggregate, None);

        let options = ApplyOptions::resolve(&settings, true, None, false);
        assert_eq!(options.aggregate, Some(AggregateMethod::Average));
        assert!(options.use_calibrated);

        let options = ApplyOptions::resolve(&Settings::ecodse(), false, None, true);
        assert_eq!(options.aggregate, Some(AggregateMethod::Average));
        assert!(!options.use_calibrated);
    }

    #[test]
    fn keep_columns_truncates() {
        let x = Array2::<f64>::zeros((2, 5));
        assert_eq!(keep_columns(x.clone(), 3).ncols(), 3);
        assert_eq!(keep_columns(x, 10).ncols(), 5);
    }
}
