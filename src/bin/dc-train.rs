//! Train a CCB-ID species model from labelled spectra.
//!
//! ```bash
//! dc-train -i training.csv -c species_id.csv -b neon-bands.csv -o model.json -v
//! dc-train -e
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use dichot::classify::EstimatorSpec;
use dichot::config::{path_or_support, resolve_support_dir, Overrides, SupportFiles};
use dichot::data::loader;
use dichot::pipeline::{self, TrainInputs};
use dichot::split::SplitMethod;
use dichot::{OutlierMethod, Settings};

#[derive(Parser, Debug)]
#[command(name = "dc-train", version)]
#[command(about = "Train a tree species classification model from spectra")]
struct Args {
    /// Input CSV/Parquet with a crown id column followed by band columns
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// CSV with crown_id, species_id and species columns
    #[arg(short, long)]
    crowns: Option<PathBuf>,

    /// CSV with Wavelength and Flag columns selecting good bands
    #[arg(short, long)]
    bands: Option<PathBuf>,

    /// Path to the output model bundle; with -e defaults to the support
    /// directory's model.json, which `dc-apply -e` reads
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run with the reference dataset and options from the ECODSE submission
    #[arg(short, long)]
    ecodse: bool,

    /// Saved reducer (JSON) to refit instead of a fresh PCA
    #[arg(long)]
    reducer: Option<PathBuf>,

    /// Number of features to keep after transformation
    #[arg(short, long)]
    n_features: Option<usize>,

    /// Estimator spec file(s) (JSON or TOML), one per model
    #[arg(short, long = "model", num_args = 1..)]
    models: Vec<PathBuf>,

    /// Remove outliers before training
    #[arg(short, long, value_enum)]
    remove_outliers: Option<OutlierMethod>,

    /// Standard-deviation threshold for outlier removal
    #[arg(long)]
    threshold: Option<f64>,

    /// How to hold out test data
    #[arg(short, long, value_enum)]
    split: Option<SplitMethod>,

    /// Skip probability calibration
    #[arg(short, long)]
    uncalibrated: bool,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Cores to use while fitting
    #[arg(long)]
    cpus: Option<usize>,

    /// Random seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Directory holding the reference support files
    #[arg(long, env = "DICHOT_SUPPORT_DIR")]
    support_dir: Option<PathBuf>,

    /// Report classification metrics
    #[arg(short, long)]
    verbose: bool,
}

fn settings_from(args: &Args) -> Result<Settings> {
    let models = args
        .models
        .iter()
        .map(|p| {
            EstimatorSpec::load(p).with_context(|| format!("reading model spec {}", p.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let overrides = Overrides {
        n_features: args.n_features,
        remove_outliers: args.remove_outliers,
        outlier_threshold: args.threshold,
        split: args.split,
        uncalibrated: args.uncalibrated,
        cpus: args.cpus,
        seed: args.seed,
        models,
    };
    let base = Settings::base(args.config.as_deref(), args.ecodse)
        .context("loading --config settings")?;
    Ok(base.with_overrides(overrides)?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    dichot::init_logging(args.verbose);

    let settings = settings_from(&args)?;
    let support = SupportFiles::in_dir(&resolve_support_dir(args.support_dir.as_deref()));

    let input =
        path_or_support(args.input.as_deref(), args.ecodse, &support.training, "--input")?;
    let crowns =
        path_or_support(args.crowns.as_deref(), args.ecodse, &support.crowns, "--crowns")?;
    let output =
        path_or_support(args.output.as_deref(), args.ecodse, &support.model, "--output")?;
    let bands_path = args
        .bands
        .clone()
        .or_else(|| args.ecodse.then(|| support.bands.clone()));

    log::info!("reading training data from {}", input.display());
    let spectra = loader::load_spectra(&input)
        .with_context(|| format!("reading spectra from {}", input.display()))?;
    let species = loader::load_species(&crowns)
        .with_context(|| format!("reading crown species from {}", crowns.display()))?;
    let bands = bands_path
        .as_deref()
        .map(|p| {
            loader::load_bands(p).with_context(|| format!("reading bands from {}", p.display()))
        })
        .transpose()?;

    let inputs = TrainInputs {
        spectra,
        species,
        bands,
        reducer_path: args.reducer.clone(),
    };
    let outcome = pipeline::train(&inputs, &settings).context("training failed")?;
    log::info!(
        "trained on {} samples, held out {}, removed {} outliers",
        outcome.n_train,
        outcome.n_test,
        outcome.n_outliers
    );

    if args.verbose {
        log::info!("[ ------ ]");
        pipeline::log_report(&outcome.report);
        log::info!("[ ------ ]");
    }

    outcome
        .bundle
        .write(&output)
        .with_context(|| format!("writing model to {}", output.display()))?;
    log::info!("saved model to {}", output.display());
    Ok(())
}
