//! dichot: tree species classification from imaging spectroscopy data
//!
//! The pipeline follows the CCB-ID approach:
//!
//! ```text
//!  spectra ─► good bands ─► PCA outliers ─► PCA reducer ─► train/test split
//!          ─► balanced resampling ─► GBC + RFC ensemble ─► sigmoid calibration
//!          ─► model bundle ─► per-crown averaged species probabilities
//! ```

pub mod bundle;
pub mod classify;
pub mod config;
pub mod crown;
pub mod data;
pub mod ensemble;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod outliers;
pub mod pipeline;
pub mod reduce;
pub mod resample;
pub mod split;
pub mod synthetic;
pub mod write;

pub use bundle::ModelBundle;
pub use config::{AggregateMethod, OutlierMethod, Settings};
pub use ensemble::Ensemble;
pub use error::{DichotError, Result};

/// Initialise `env_logger`: `info` by default, `debug` when verbose.
/// `RUST_LOG` takes precedence over both.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
