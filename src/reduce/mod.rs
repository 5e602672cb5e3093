//! Dimensionality reduction of spectra before classification

mod eigen;
pub mod pca;

use std::path::Path;

use ndarray::{s, Array2};

pub use eigen::symmetric_eigen;
pub use pca::{Pca, PcaState};

use crate::error::Result;

/// Whitened PCA keeping `n_pcs` components, fit and applied to `x`.
pub fn pca(x: &Array2<f64>, n_pcs: usize) -> Result<(Pca, Array2<f64>)> {
    let mut reducer = Pca::new(n_pcs, true);
    let transformed = reducer.fit_transform(x)?;
    Ok((reducer, transformed))
}

/// Load a saved reducer, refit it on `x`, and keep the leading
/// `n_features` columns when given.
pub fn from_path(
    path: &Path,
    x: &Array2<f64>,
    n_features: Option<usize>,
) -> Result<(Pca, Array2<f64>)> {
    let mut reducer = Pca::load(path)?;
    let transformed = reducer.fit_transform(x)?;
    let transformed = match n_features {
        Some(n) if n < transformed.ncols() => transformed.slice(s![.., ..n]).to_owned(),
        _ => transformed,
    };
    Ok((reducer, transformed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn from_path_refits_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reducer.json");
        Pca::new(3, true).save(&path).unwrap();

        let x = array![
            [1.0, 0.0, 2.0, 1.0],
            [2.0, 1.0, 0.0, 1.5],
            [0.0, 3.0, 1.0, 0.5],
            [1.5, 2.0, 2.5, 0.0],
            [0.5, 0.5, 0.5, 2.0],
        ];
        let (reducer, z) = from_path(&path, &x, Some(2)).unwrap();
        assert!(reducer.is_fitted());
        assert_eq!(z.dim(), (5, 2));
    }
}
