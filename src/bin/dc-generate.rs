//! Write a synthetic support directory for trying out dc-train / dc-apply.
//!
//! ```bash
//! dc-generate -o support_files --species 5 --seed 42
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use dichot::synthetic::{self, SyntheticConfig};

#[derive(Parser, Debug)]
#[command(name = "dc-generate", version)]
#[command(about = "Generate synthetic labelled canopy spectra")]
struct Args {
    /// Output directory
    #[arg(short, long, default_value = "support_files")]
    output: PathBuf,

    /// Number of species
    #[arg(long, default_value_t = 5)]
    species: usize,

    /// Training crowns per species
    #[arg(long, default_value_t = 12)]
    train_crowns: usize,

    /// Testing crowns per species
    #[arg(long, default_value_t = 4)]
    test_crowns: usize,

    /// Pixels sampled per crown
    #[arg(long, default_value_t = 8)]
    pixels: usize,

    /// Number of spectral bands between 400 and 2500 nm
    #[arg(long, default_value_t = 120)]
    bands: usize,

    /// Reflectance noise standard deviation
    #[arg(long, default_value_t = 0.01)]
    noise: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    dichot::init_logging(args.verbose);

    let config = SyntheticConfig {
        n_species: args.species,
        train_crowns_per_species: args.train_crowns,
        test_crowns_per_species: args.test_crowns,
        pixels_per_crown: args.pixels,
        n_bands: args.bands,
        noise: args.noise,
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let out = synthetic::generate(&args.output, &config, &mut rng)
        .with_context(|| format!("writing synthetic data to {}", args.output.display()))?;
    println!(
        "Wrote {} training and {} testing spectra ({} good bands) to {}",
        out.n_train_samples,
        out.n_test_samples,
        out.n_good_bands,
        args.output.display()
    );
    Ok(())
}
