//! Apply a trained CCB-ID model to new spectra.
//!
//! ```bash
//! dc-apply -i testing.csv -m model.json -o predictions.csv -a average
//! dc-apply -e -o predictions.csv -v
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use dichot::config::{path_or_support, resolve_support_dir, SupportFiles};
use dichot::data::loader;
use dichot::pipeline::{self, ApplyOptions};
use dichot::{AggregateMethod, ModelBundle, Settings};

#[derive(Parser, Debug)]
#[command(name = "dc-apply", version)]
#[command(about = "Predict tree species probabilities with a trained model")]
struct Args {
    /// Input CSV/Parquet with a crown id column followed by band columns
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Model bundle written by dc-train
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Path to the output predictions CSV
    #[arg(short, long)]
    output: PathBuf,

    /// Crown species CSV; enables accuracy reporting when verbose
    #[arg(short, long)]
    crowns: Option<PathBuf>,

    /// Aggregate sample predictions per crown
    #[arg(short, long, value_enum)]
    aggregate: Option<AggregateMethod>,

    /// Report uncalibrated probabilities
    #[arg(short, long)]
    uncalibrated: bool,

    /// Run with the reference testing data and model
    #[arg(short, long)]
    ecodse: bool,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the reference support files
    #[arg(long, env = "DICHOT_SUPPORT_DIR")]
    support_dir: Option<PathBuf>,

    /// Report classification metrics
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    dichot::init_logging(args.verbose);

    let support = SupportFiles::in_dir(&resolve_support_dir(args.support_dir.as_deref()));
    let input =
        path_or_support(args.input.as_deref(), args.ecodse, &support.testing, "--input")?;
    let model =
        path_or_support(args.model.as_deref(), args.ecodse, &support.model, "--model")?;

    let bundle = ModelBundle::read(&model)
        .with_context(|| format!("reading model from {}", model.display()))?;
    log::info!(
        "loaded model with {} estimators for {} species",
        bundle.ensemble.n_models(),
        bundle.ensemble.n_classes
    );

    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => bundle.settings.clone(),
    };
    let options =
        ApplyOptions::resolve(&settings, args.ecodse, args.aggregate, args.uncalibrated);

    let spectra = loader::load_spectra(&input)
        .with_context(|| format!("reading spectra from {}", input.display()))?;
    log::info!("predicting {} samples from {}", spectra.len(), input.display());
    let predictions = pipeline::apply(&bundle, &spectra, options).context("prediction failed")?;
    predictions
        .write_csv(&args.output)
        .with_context(|| format!("writing predictions to {}", args.output.display()))?;
    log::info!("saved predictions to {}", args.output.display());

    let crowns = args
        .crowns
        .clone()
        .or_else(|| args.ecodse.then(|| support.crowns.clone()));
    if let (true, Some(path)) = (args.verbose, crowns) {
        let species = loader::load_species(&path)
            .with_context(|| format!("reading crown species from {}", path.display()))?;
        match predictions.evaluate(&species, "ensemble") {
            Some(score) => pipeline::log_report(&[score]),
            None => log::warn!("no predicted crowns appear in {}", path.display()),
        }
    }
    Ok(())
}
