use rand::rngs::StdRng;
use rand::SeedableRng;

use dichot::classify::boosting::BoostingParams;
use dichot::classify::forest::ForestParams;
use dichot::classify::EstimatorSpec;
use dichot::config::{path_or_support, Overrides};
use dichot::data::{loader, Label};
use dichot::pipeline::{self, ApplyOptions, TrainInputs};
use dichot::split::SplitMethod;
use dichot::synthetic::{self, Generated, SyntheticConfig};
use dichot::{AggregateMethod, ModelBundle, OutlierMethod, Settings};

fn support_dir(dir: &std::path::Path) -> Generated {
    let config = SyntheticConfig {
        n_species: 3,
        train_crowns_per_species: 6,
        test_crowns_per_species: 2,
        pixels_per_crown: 5,
        n_bands: 60,
        noise: 0.005,
    };
    let mut rng = StdRng::seed_from_u64(7);
    synthetic::generate(dir, &config, &mut rng).unwrap()
}

fn small_settings() -> Settings {
    Settings {
        n_features: 6,
        remove_outliers: Some(OutlierMethod::Pca),
        outlier_threshold: 4.0,
        outlier_components: 5,
        split: SplitMethod::Crown,
        test_fraction: 0.25,
        n_per_class: 40,
        aggregate: Some(AggregateMethod::Average),
        uncalibrated: false,
        calibration_folds: 2,
        cpus: 2,
        seed: Some(11),
        models: vec![
            EstimatorSpec::GradientBoosting(BoostingParams {
                n_estimators: 15,
                ..BoostingParams::default()
            }),
            EstimatorSpec::RandomForest(ForestParams {
                n_estimators: 15,
                ..ForestParams::default()
            }),
        ],
    }
}

fn inputs(generated: &Generated) -> TrainInputs {
    TrainInputs {
        spectra: loader::load_spectra(&generated.files.training).unwrap(),
        species: loader::load_species(&generated.files.crowns).unwrap(),
        bands: Some(loader::load_bands(&generated.files.bands).unwrap()),
        reducer_path: None,
    }
}

#[test]
fn train_save_load_apply() {
    let dir = tempfile::tempdir().unwrap();
    let generated = support_dir(dir.path());
    let settings = small_settings();

    let outcome = pipeline::train(&inputs(&generated), &settings).unwrap();
    assert!(outcome.n_train > 0);
    assert!(outcome.n_test > 0);
    assert!(!outcome.report.is_empty());
    for score in &outcome.report {
        assert!((0.0..=1.0).contains(&score.accuracy), "{}", score.name);
        assert!(score.log_loss.is_finite());
    }

    let ensemble = &outcome.bundle.ensemble;
    assert!(ensemble.is_fitted());
    assert!(ensemble.is_calibrated);
    assert_eq!(ensemble.n_models(), 2);
    assert_eq!(
        ensemble.labels.as_deref(),
        Some(&[Label::from("PIPA"), Label::from("QUGE"), Label::from("QULA")][..])
    );
    assert_eq!(outcome.bundle.species_names[0], "Pinus palustris");

    let model_path = dir.path().join("model.json");
    outcome.bundle.write(&model_path).unwrap();
    let bundle = ModelBundle::read(&model_path).unwrap();
    assert_eq!(bundle.settings, settings);

    let testing = loader::load_spectra(&generated.files.testing).unwrap();
    let predictions = pipeline::apply(&bundle, &testing, ApplyOptions::from(&settings)).unwrap();
    assert!(predictions.aggregated);
    assert_eq!(predictions.ids.len(), 6);
    assert_eq!(predictions.proba.dim(), (6, 3));
    for row in predictions.proba.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-9);
    }

    let out = dir.path().join("predictions.csv");
    predictions.write_csv(&out).unwrap();
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().next(), Some("crown_id,species_id,probability"));
    assert_eq!(text.lines().count(), 1 + 6 * 3);

    let species = loader::load_species(&generated.files.crowns).unwrap();
    let score = predictions.evaluate(&species, "ensemble").unwrap();
    assert!((0.0..=1.0).contains(&score.accuracy));
}

#[test]
fn ecodse_train_then_apply_through_support_dir() {
    let dir = tempfile::tempdir().unwrap();
    let generated = support_dir(dir.path());
    let files = &generated.files;

    // dc-train -e: preset plus command-line overrides, model saved into the support dir
    let overrides = Overrides {
        n_features: Some(6),
        outlier_threshold: Some(4.0),
        cpus: Some(2),
        seed: Some(11),
        models: small_settings().models,
        ..Overrides::default()
    };
    let settings = Settings::base(None, true).unwrap().with_overrides(overrides).unwrap();
    let output = path_or_support(None, true, &files.model, "--output").unwrap();
    assert_eq!(output, files.model);
    assert!(!output.exists());
    pipeline::train(&inputs(&generated), &settings)
        .unwrap()
        .bundle
        .write(&output)
        .unwrap();

    // dc-apply -e: model and testing data both come from the support dir
    let model = path_or_support(None, true, &files.model, "--model").unwrap();
    let input = path_or_support(None, true, &files.testing, "--input").unwrap();
    let bundle = ModelBundle::read(&model).unwrap();
    let options = ApplyOptions::resolve(&bundle.settings, true, None, false);
    assert_eq!(options.aggregate, Some(AggregateMethod::Average));
    assert!(options.use_calibrated);

    let testing = loader::load_spectra(&input).unwrap();
    let predictions = pipeline::apply(&bundle, &testing, options).unwrap();
    assert!(predictions.aggregated);
    assert_eq!(predictions.proba.dim(), (6, 3));
}

#[test]
fn per_sample_uncalibrated_output() {
    let dir = tempfile::tempdir().unwrap();
    let generated = support_dir(dir.path());
    let mut settings = small_settings();
    settings.uncalibrated = true;
    settings.aggregate = None;
    settings.split = SplitMethod::Sample;

    let outcome = pipeline::train(&inputs(&generated), &settings).unwrap();
    assert!(!outcome.bundle.ensemble.is_calibrated);

    let testing = loader::load_spectra(&generated.files.testing).unwrap();
    let options = ApplyOptions {
        aggregate: None,
        use_calibrated: true,
    };
    // falls back to uncalibrated probabilities
    let predictions = pipeline::apply(&outcome.bundle, &testing, options).unwrap();
    assert!(!predictions.aggregated);
    assert_eq!(predictions.ids.len(), testing.len());

    let out = dir.path().join("samples.csv");
    predictions.write_csv(&out).unwrap();
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().next(), Some("crown_id,PIPA,QUGE,QULA"));
    assert_eq!(text.lines().count(), 1 + testing.len());
}

#[test]
fn trains_from_parquet() {
    let dir = tempfile::tempdir().unwrap();
    let generated = support_dir(dir.path());
    let mut settings = small_settings();
    settings.remove_outliers = None;
    settings.uncalibrated = true;

    let mut train = inputs(&generated);
    train.spectra = loader::load_spectra(&generated.parquet).unwrap();
    let outcome = pipeline::train(&train, &settings).unwrap();
    assert_eq!(outcome.n_outliers, 0);
    assert_eq!(outcome.bundle.ensemble.n_classes, 3);
}

#[test]
fn unmatched_species_table_fails() {
    let dir = tempfile::tempdir().unwrap();
    let generated = support_dir(dir.path());
    let species = dir.path().join("other.csv");
    std::fs::write(&species, "crown_id,species_id,species\n9999,PIPA,Pinus palustris\n").unwrap();

    let mut train = inputs(&generated);
    train.species = loader::load_species(&species).unwrap();
    assert!(pipeline::train(&train, &small_settings()).is_err());
}
