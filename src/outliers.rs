//! PCA-based outlier flagging for reflectance data

use ndarray::Array2;

use crate::error::Result;
use crate::reduce::Pca;

/// Flag samples whose whitened score on any of the first `n_pcs`
/// components lies more than `threshold` standard deviations from the mean.
///
/// Returns a mask with `true` for samples to keep.
pub fn with_pca(features: &Array2<f64>, n_pcs: usize, threshold: f64) -> Result<Vec<bool>> {
    let mut reducer = Pca::new(n_pcs, true);
    let transformed = reducer.fit_transform(features)?;

    let mask: Vec<bool> = transformed
        .rows()
        .into_iter()
        .map(|row| row.iter().all(|v| v.abs() <= threshold))
        .collect();

    let dropped = mask.iter().filter(|keep| !**keep).count();
    log::debug!(
        "flagged {dropped} of {} samples as outliers (threshold {threshold})",
        mask.len()
    );
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_extreme_sample() {
        let mut rows = Vec::new();
        for i in 0..40 {
            let t = i as f64 / 40.0;
            rows.extend_from_slice(&[t, 1.0 - t, 0.5 + 0.01 * (i % 3) as f64]);
        }
        // one spectrum far off the manifold
        rows.extend_from_slice(&[30.0, -25.0, 9.0]);
        let x = Array2::from_shape_vec((41, 3), rows).unwrap();

        let mask = with_pca(&x, 2, 3.0).unwrap();
        assert_eq!(mask.len(), 41);
        assert!(!mask[40]);
        assert!(mask.iter().take(40).filter(|k| **k).count() >= 38);
    }

    #[test]
    fn huge_threshold_keeps_everything() {
        let x = Array2::from_shape_fn((10, 4), |(i, j)| ((i * 7 + j * 3) % 5) as f64);
        let mask = with_pca(&x, 3, 1e6).unwrap();
        assert!(mask.iter().all(|k| *k));
    }
}
