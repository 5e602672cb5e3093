//! Synthetic canopy spectra laid out like the reference support directory
//!
//! Each species gets a vegetation-like reflectance curve with a few
//! species-specific Gaussian features. Crowns scale that curve by a random
//! brightness and pixels add noise. Bands inside the atmospheric water
//! absorption windows are flagged bad and carry extra noise.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Float64Builder, Int64Array, ListBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use rand::Rng;

use crate::config::SupportFiles;
use crate::error::{DichotError, Result};

/// Species code, full name and genus, in the style of the ECODSE data.
const SPECIES: &[(&str, &str, &str)] = &[
    ("PIPA", "Pinus palustris", "Pinus"),
    ("QULA", "Quercus laevis", "Quercus"),
    ("QUGE", "Quercus geminata", "Quercus"),
    ("ACRU", "Acer rubrum", "Acer"),
    ("LIST", "Liquidambar styraciflua", "Liquidambar"),
    ("PIEL", "Pinus elliottii", "Pinus"),
    ("MAGNO", "Magnolia grandiflora", "Magnolia"),
    ("NYSY", "Nyssa sylvatica", "Nyssa"),
    ("QUNI", "Quercus nigra", "Quercus"),
];

/// Water vapour absorption windows, in nm.
const BAD_WINDOWS: &[(f64, f64)] = &[(1340.0, 1445.0), (1790.0, 1955.0)];

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub n_species: usize,
    pub train_crowns_per_species: usize,
    pub test_crowns_per_species: usize,
    pub pixels_per_crown: usize,
    pub n_bands: usize,
    pub noise: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            n_species: 5,
            train_crowns_per_species: 12,
            test_crowns_per_species: 4,
            pixels_per_crown: 8,
            n_bands: 120,
            noise: 0.01,
        }
    }
}

/// What `generate` wrote.
#[derive(Debug, Clone)]
pub struct Generated {
    pub files: SupportFiles,
    pub parquet: PathBuf,
    pub n_train_samples: usize,
    pub n_test_samples: usize,
    pub n_good_bands: usize,
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Box-Muller transform for normal draws
fn gauss<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(1e-15);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

fn is_bad_band(wavelength: f64) -> bool {
    BAD_WINDOWS
        .iter()
        .any(|&(lo, hi)| wavelength >= lo && wavelength <= hi)
}

/// Green peak, red edge and the broad leaf water features.
fn vegetation(wl: f64) -> f64 {
    let red_edge = 0.4 / (1.0 + (-(wl - 715.0) / 20.0).exp());
    let green = gaussian(wl, 550.0, 35.0, 0.06);
    let water = gaussian(wl, 970.0, 40.0, 0.04)
        + gaussian(wl, 1200.0, 60.0, 0.08)
        + gaussian(wl, 1450.0, 80.0, 0.2)
        + gaussian(wl, 1940.0, 90.0, 0.25);
    0.03 + green + red_edge - water * (wl / 2500.0)
}

fn species_signatures<R: Rng + ?Sized>(
    wavelengths: &[f64],
    n_species: usize,
    rng: &mut R,
) -> Vec<Vec<f64>> {
    (0..n_species)
        .map(|_| {
            let peaks: Vec<(f64, f64, f64)> = (0..3)
                .map(|_| {
                    let mu = rng.gen_range(450.0..2400.0);
                    let sigma = rng.gen_range(30.0..120.0);
                    let amp = rng.gen_range(-0.06..0.06);
                    (mu, sigma, amp)
                })
                .collect();
            wavelengths
                .iter()
                .map(|&wl| {
                    let extra: f64 = peaks
                        .iter()
                        .map(|&(mu, sigma, amp)| gaussian(wl, mu, sigma, amp))
                        .sum();
                    (vegetation(wl) + extra).max(0.0)
                })
                .collect()
        })
        .collect()
}

struct Crowns {
    ids: Vec<i64>,
    spectra: Vec<Vec<f64>>,
}

fn sample_crowns<R: Rng + ?Sized>(
    signatures: &[Vec<f64>],
    wavelengths: &[f64],
    crowns: &[(i64, usize)],
    config: &SyntheticConfig,
    rng: &mut R,
) -> Crowns {
    let mut out = Crowns {
        ids: Vec::new(),
        spectra: Vec::new(),
    };
    for &(crown_id, species) in crowns {
        let brightness = gauss(rng, 1.0, 0.05);
        for _ in 0..config.pixels_per_crown {
            let spectrum = signatures[species]
                .iter()
                .zip(wavelengths)
                .map(|(&r, &wl)| {
                    let sd = if is_bad_band(wl) {
                        config.noise * 10.0
                    } else {
                        config.noise
                    };
                    r * brightness + gauss(rng, 0.0, sd)
                })
                .collect();
            out.ids.push(crown_id);
            out.spectra.push(spectrum);
        }
    }
    out
}

fn write_spectra_csv(path: &Path, n_bands: usize, crowns: &Crowns) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["crown_id".to_string()];
    header.extend((1..=n_bands).map(|b| format!("b{b:03}")));
    writer.write_record(&header)?;
    for (id, spectrum) in crowns.ids.iter().zip(&crowns.spectra) {
        let mut record = vec![id.to_string()];
        record.extend(spectrum.iter().map(|v| format!("{v:.6}")));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_spectra_parquet(path: &Path, crowns: &Crowns) -> Result<()> {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in &crowns.spectra {
        let values = builder.values();
        for &v in row {
            values.append_value(v);
        }
        builder.append(true);
    }
    let reflectance = builder.finish();
    let ids = Int64Array::from(crowns.ids.clone());

    let schema = Arc::new(Schema::new(vec![
        Field::new("crown_id", DataType::Int64, false),
        Field::new(
            "reflectance",
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            false,
        ),
    ]));
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(ids), Arc::new(reflectance)])?;

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Write `training.csv`, `testing.csv`, `species_id.csv`, `neon-bands.csv`
/// and `training.parquet` into `dir`.
pub fn generate<R: Rng + ?Sized>(
    dir: &Path,
    config: &SyntheticConfig,
    rng: &mut R,
) -> Result<Generated> {
    if config.n_species < 2 || config.n_species > SPECIES.len() {
        return Err(DichotError::Config(format!(
            "n_species must be between 2 and {}, got {}",
            SPECIES.len(),
            config.n_species
        )));
    }
    if config.n_bands < 2 || config.pixels_per_crown == 0 || config.train_crowns_per_species == 0
    {
        return Err(DichotError::Config(
            "need at least two bands, one pixel per crown and one training crown".into(),
        ));
    }
    std::fs::create_dir_all(dir)?;
    let files = SupportFiles::in_dir(dir);

    let step = (2500.0 - 400.0) / (config.n_bands - 1) as f64;
    let wavelengths: Vec<f64> = (0..config.n_bands).map(|i| 400.0 + i as f64 * step).collect();
    let signatures = species_signatures(&wavelengths, config.n_species, rng);

    // crown ids run across train then test so the two never overlap
    let mut next_id = 1i64;
    let mut assign = |per_species: usize| -> Vec<(i64, usize)> {
        let mut crowns = Vec::new();
        for species in 0..config.n_species {
            for _ in 0..per_species {
                crowns.push((next_id, species));
                next_id += 1;
            }
        }
        crowns
    };
    let train_crowns = assign(config.train_crowns_per_species);
    let test_crowns = assign(config.test_crowns_per_species);

    let train = sample_crowns(&signatures, &wavelengths, &train_crowns, config, rng);
    let test = sample_crowns(&signatures, &wavelengths, &test_crowns, config, rng);
    write_spectra_csv(&files.training, config.n_bands, &train)?;
    write_spectra_csv(&files.testing, config.n_bands, &test)?;
    let parquet = dir.join("training.parquet");
    write_spectra_parquet(&parquet, &train)?;

    let mut species = csv::Writer::from_path(&files.crowns)?;
    species.write_record(["crown_id", "species_id", "species", "genus_id", "genus"])?;
    let genera: Vec<&str> = {
        let mut g: Vec<&str> = SPECIES[..config.n_species].iter().map(|s| s.2).collect();
        g.sort_unstable();
        g.dedup();
        g
    };
    for &(crown_id, sp) in train_crowns.iter().chain(&test_crowns) {
        let (code, name, genus) = SPECIES[sp];
        let genus_id = genera.iter().position(|g| *g == genus).unwrap_or(0);
        species.write_record([
            crown_id.to_string(),
            code.to_string(),
            name.to_string(),
            genus_id.to_string(),
            genus.to_string(),
        ])?;
    }
    species.flush()?;

    let mut bands = csv::Writer::from_path(&files.bands)?;
    bands.write_record(["Wavelength", "Flag"])?;
    let mut n_good_bands = 0;
    for &wl in &wavelengths {
        let flag = if is_bad_band(wl) { 0 } else { 1 };
        n_good_bands += flag;
        bands.write_record([format!("{wl:.2}"), flag.to_string()])?;
    }
    bands.flush()?;

    log::info!(
        "wrote {} training and {} testing spectra ({} bands, {} species) to {}",
        train.ids.len(),
        test.ids.len(),
        config.n_bands,
        config.n_species,
        dir.display()
    );
    Ok(Generated {
        files,
        parquet,
        n_train_samples: train.ids.len(),
        n_test_samples: test.ids.len(),
        n_good_bands,
    })
}
