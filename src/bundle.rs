//! The persisted model: ensemble, reducer and the settings it was trained with

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::ensemble::Ensemble;
use crate::error::{DichotError, Result};

/// Bumped when the on-disk layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format_version: u32,
    pub ensemble: Ensemble,
    pub settings: Settings,
    /// Species name per class index, empty when unknown.
    #[serde(default)]
    pub species_names: Vec<String>,
}

impl ModelBundle {
    pub fn new(ensemble: Ensemble, settings: Settings, species_names: Vec<String>) -> Self {
        ModelBundle {
            format_version: FORMAT_VERSION,
            ensemble,
            settings,
            species_names,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        log::debug!("wrote model bundle to {}", path.display());
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let bundle: ModelBundle = serde_json::from_reader(BufReader::new(file))?;
        if bundle.format_version != FORMAT_VERSION {
            return Err(DichotError::Unsupported(format!(
                "model bundle format {} (expected {FORMAT_VERSION})",
                bundle.format_version
            )));
        }
        if !bundle.ensemble.is_fitted() {
            return Err(DichotError::NotFitted(format!(
                "model bundle {} holds an unfitted ensemble",
                path.display()
            )));
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unfitted_and_foreign_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let bundle = ModelBundle::new(Ensemble::default(), Settings::default(), Vec::new());
        bundle.write(&path).unwrap();
        assert!(matches!(
            ModelBundle::read(&path),
            Err(DichotError::NotFitted(_))
        ));

        let mut old = bundle;
        old.format_version = FORMAT_VERSION + 1;
        old.write(&path).unwrap();
        assert!(matches!(
            ModelBundle::read(&path),
            Err(DichotError::Unsupported(_))
        ));
    }
}
