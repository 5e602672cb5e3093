//! Prediction output writers

use std::path::Path;

use ndarray::Array2;

use crate::crown::csv_labels;
use crate::data::Label;
use crate::error::{DichotError, Result};

fn check_dims(rows: usize, labels: usize, proba: &Array2<f64>) -> Result<()> {
    if proba.dim() != (rows, labels) {
        return Err(DichotError::shape(
            format!("{rows} x {labels} probabilities"),
            format!("{} x {}", proba.nrows(), proba.ncols()),
        ));
    }
    Ok(())
}

/// Long format, one row per crown and species:
/// `crown_id,species_id,probability`.
pub fn predictions_csv(
    path: &Path,
    crowns: &[Label],
    species: &[Label],
    proba: &Array2<f64>,
) -> Result<()> {
    check_dims(crowns.len(), species.len(), proba)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["crown_id", "species_id", "probability"])?;
    let (id_rows, sp_rows) = csv_labels(crowns, species);
    for ((id, sp), p) in id_rows.iter().zip(&sp_rows).zip(proba.iter()) {
        writer.write_record([id.to_string(), sp.to_string(), p.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Wide format, one row per sample: `crown_id,<species…>`.
pub fn sample_predictions_csv(
    path: &Path,
    crowns: &[Label],
    species: &[Label],
    proba: &Array2<f64>,
) -> Result<()> {
    check_dims(crowns.len(), species.len(), proba)?;
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["crown_id".to_string()];
    header.extend(species.iter().map(|s| s.to_string()));
    writer.write_record(&header)?;
    for (crown, row) in crowns.iter().zip(proba.rows()) {
        let mut record = vec![crown.to_string()];
        record.extend(row.iter().map(|p| p.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Raster prediction output is not implemented.
pub fn predictions_raster(path: &Path) -> Result<()> {
    Err(DichotError::Unsupported(format!(
        "raster prediction output ({})",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn long_format_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pred.csv");
        let proba = array![[0.25, 0.75], [1.0, 0.0]];
        predictions_csv(
            &path,
            &[Label::from(4), Label::from(9)],
            &[Label::from("PIPA"), Label::from("QULA")],
            &proba,
        )
        .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "crown_id,species_id,probability");
        assert_eq!(lines[1], "4,PIPA,0.25");
        assert_eq!(lines[2], "4,QULA,0.75");
        assert_eq!(lines[3], "9,PIPA,1");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn wide_format_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pred.csv");
        let proba = array![[0.5, 0.5]];
        sample_predictions_csv(&path, &[Label::from(1)], &[Label::from(2), Label::from(3)], &proba)
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "crown_id,2,3\n1,0.5,0.5\n");
    }

    #[test]
    fn mismatched_shapes_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pred.csv");
        let proba = array![[0.5, 0.5]];
        assert!(predictions_csv(&path, &[Label::from(1)], &[Label::from(2)], &proba).is_err());
        assert!(predictions_raster(&path).is_err());
    }
}
