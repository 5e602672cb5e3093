//! Pipeline settings and support-file resolution

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classify::EstimatorSpec;
use crate::error::{DichotError, Result};
use crate::split::SplitMethod;

/// Environment variable naming the reference support directory.
pub const SUPPORT_DIR_ENV: &str = "DICHOT_SUPPORT_DIR";
const DEFAULT_SUPPORT_DIR: &str = "support_files";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    Pca,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AggregateMethod {
    Average,
}

/// Every tunable of the train/apply pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Reduced features kept after the PCA transform.
    pub n_features: usize,
    pub remove_outliers: Option<OutlierMethod>,
    /// Standard-deviation multiplier for outlier flagging.
    pub outlier_threshold: f64,
    pub outlier_components: usize,
    pub split: SplitMethod,
    pub test_fraction: f64,
    /// Draws per species in the balanced training set.
    pub n_per_class: usize,
    pub aggregate: Option<AggregateMethod>,
    pub uncalibrated: bool,
    pub calibration_folds: usize,
    pub cpus: usize,
    pub seed: Option<u64>,
    pub models: Vec<EstimatorSpec>,
}

fn default_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            n_features: 100,
            remove_outliers: None,
            outlier_threshold: 3.0,
            outlier_components: 20,
            split: SplitMethod::Sample,
            test_fraction: 0.25,
            n_per_class: 400,
            aggregate: None,
            uncalibrated: false,
            calibration_folds: 3,
            cpus: default_cpus(),
            seed: None,
            models: EstimatorSpec::defaults(),
        }
    }
}

impl Settings {
    /// Options used for the ECODSE competition submission.
    pub fn ecodse() -> Self {
        Settings {
            n_features: 100,
            remove_outliers: Some(OutlierMethod::Pca),
            outlier_threshold: 3.0,
            split: SplitMethod::Crown,
            aggregate: Some(AggregateMethod::Average),
            ..Settings::default()
        }
    }

    /// Parse settings from TOML; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_features == 0 {
            return Err(DichotError::Config("n_features must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(DichotError::Config(format!(
                "test_fraction must be in [0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.outlier_threshold <= 0.0 {
            return Err(DichotError::Config(
                "outlier_threshold must be positive".into(),
            ));
        }
        if self.n_per_class == 0 {
            return Err(DichotError::Config("n_per_class must be positive".into()));
        }
        if self.calibration_folds < 2 {
            return Err(DichotError::Config(
                "calibration_folds must be at least 2".into(),
            ));
        }
        if self.models.is_empty() {
            return Err(DichotError::Config("at least one model is required".into()));
        }
        Ok(())
    }

    /// Model specs with the thread budget applied.
    pub fn model_specs(&self) -> Vec<EstimatorSpec> {
        self.models
            .iter()
            .cloned()
            .map(|s| s.with_jobs(self.cpus))
            .collect()
    }
}

/// Command-line values layered over file or preset settings. `None` and
/// `false` leave the underlying setting alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub n_features: Option<usize>,
    pub remove_outliers: Option<OutlierMethod>,
    pub outlier_threshold: Option<f64>,
    pub split: Option<SplitMethod>,
    pub uncalibrated: bool,
    pub cpus: Option<usize>,
    pub seed: Option<u64>,
    /// Replaces the model list when non-empty.
    pub models: Vec<EstimatorSpec>,
}

impl Settings {
    /// Starting point before command-line overrides. A settings file
    /// replaces the preset entirely; without one, `ecodse` selects
    /// [`Settings::ecodse`] and otherwise the defaults apply.
    pub fn base(config: Option<&Path>, ecodse: bool) -> Result<Self> {
        match config {
            Some(path) => Self::load(path),
            None if ecodse => Ok(Self::ecodse()),
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line overrides and validate the result.
    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(n) = overrides.n_features {
            self.n_features = n;
        }
        if overrides.remove_outliers.is_some() {
            self.remove_outliers = overrides.remove_outliers;
        }
        if let Some(t) = overrides.outlier_threshold {
            self.outlier_threshold = t;
        }
        if let Some(split) = overrides.split {
            self.split = split;
        }
        if overrides.uncalibrated {
            self.uncalibrated = true;
        }
        if let Some(c) = overrides.cpus {
            self.cpus = c.max(1);
        }
        if overrides.seed.is_some() {
            self.seed = overrides.seed;
        }
        if !overrides.models.is_empty() {
            self.models = overrides.models;
        }
        self.validate()?;
        Ok(self)
    }
}

/// An explicitly given path, else the support-directory file when running
/// with `-e`. `flag` names the option in the error.
pub fn path_or_support(
    explicit: Option<&Path>,
    ecodse: bool,
    support: &Path,
    flag: &str,
) -> Result<PathBuf> {
    match (explicit, ecodse) {
        (Some(path), _) => Ok(path.to_path_buf()),
        (None, true) => Ok(support.to_path_buf()),
        (None, false) => Err(DichotError::Config(format!(
            "{flag} is required unless running with -e"
        ))),
    }
}

/// Reference support directory, in priority order:
/// 1. Command-line argument
/// 2. `DICHOT_SUPPORT_DIR`
/// 3. `./support_files`
pub fn resolve_support_dir(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(SUPPORT_DIR_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_SUPPORT_DIR)
}

/// File names inside the support directory.
#[derive(Debug, Clone)]
pub struct SupportFiles {
    pub training: PathBuf,
    pub testing: PathBuf,
    pub crowns: PathBuf,
    pub bands: PathBuf,
    pub model: PathBuf,
}

impl SupportFiles {
    pub fn in_dir(dir: &Path) -> Self {
        SupportFiles {
            training: dir.join("training.csv"),
            testing: dir.join("testing.csv"),
            crowns: dir.join("species_id.csv"),
            bands: dir.join("neon-bands.csv"),
            model: dir.join("model.json"),
        }
    }
}
