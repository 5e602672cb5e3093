use ndarray::{s, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::eigen::symmetric_eigen;
use crate::error::{DichotError, Result};

/// Variances below this are treated as zero when whitening.
const MIN_VARIANCE: f64 = 1e-12;

/// Fitted PCA parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaState {
    pub mean: Array1<f64>,
    /// Shape `(n_components, n_features)`, one component per row.
    pub components: Array2<f64>,
    pub explained_variance: Array1<f64>,
}

/// Principal component reducer, optionally whitened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pca {
    pub n_components: usize,
    #[serde(default = "default_whiten")]
    pub whiten: bool,
    #[serde(default)]
    pub state: Option<PcaState>,
}

fn default_whiten() -> bool {
    true
}

impl Pca {
    pub fn new(n_components: usize, whiten: bool) -> Self {
        Pca {
            n_components,
            whiten,
            state: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Number of components the fitted reducer emits.
    pub fn output_dim(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.components.nrows())
    }

    /// Fit on `x` (rows = samples). `n_components` is clamped to
    /// `min(n_samples, n_features)`.
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let (n, m) = x.dim();
        if n == 0 || m == 0 {
            return Err(DichotError::InvalidData(
                "cannot fit PCA on an empty matrix".into(),
            ));
        }
        let k = self.n_components.min(n).min(m).max(1);
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| DichotError::InvalidData("empty PCA input".into()))?;
        let centered = x - &mean;
        let denom = (n.max(2) - 1) as f64;

        // Decompose whichever Gram form is smaller.
        let (values, components) = if m <= n {
            let cov = centered.t().dot(&centered) / denom;
            let (vals, vecs) = symmetric_eigen(&cov)?;
            (vals, vecs.t().to_owned())
        } else {
            let gram = centered.dot(&centered.t()) / denom;
            let (vals, vecs) = symmetric_eigen(&gram)?;
            let mut comps = centered.t().dot(&vecs).reversed_axes();
            for mut row in comps.rows_mut() {
                let norm = row.dot(&row).sqrt();
                if norm > 0.0 {
                    row /= norm;
                }
            }
            (vals, comps)
        };

        let mut components = components.slice(s![..k, ..]).to_owned();
        for mut row in components.rows_mut() {
            let pivot = row
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
                .unwrap_or(0.0);
            if pivot < 0.0 {
                row.mapv_inplace(|v| -v);
            }
        }
        let explained_variance = values.slice(s![..k]).mapv(|v| v.max(0.0));

        log::debug!("fitted PCA with {k} of {m} components on {n} samples");
        self.state = Some(PcaState {
            mean,
            components,
            explained_variance,
        });
        Ok(())
    }

    /// Project `x` onto the fitted components.
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| DichotError::NotFitted("PCA reducer".into()))?;
        if x.ncols() != state.mean.len() {
            return Err(DichotError::shape(
                format!("{} input features", state.mean.len()),
                format!("{} input features", x.ncols()),
            ));
        }
        let mut projected = (x - &state.mean).dot(&state.components.t());
        if self.whiten {
            for (mut col, var) in projected
                .columns_mut()
                .into_iter()
                .zip(state.explained_variance.iter())
            {
                if *var > MIN_VARIANCE {
                    col /= var.sqrt();
                }
            }
        }
        Ok(projected)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample() -> Array2<f64> {
        array![
            [2.5, 2.4, 1.0],
            [0.5, 0.7, 1.1],
            [2.2, 2.9, 0.9],
            [1.9, 2.2, 1.0],
            [3.1, 3.0, 1.2],
            [2.3, 2.7, 0.8],
            [2.0, 1.6, 1.0],
            [1.0, 1.1, 1.1],
        ]
    }

    #[test]
    fn whitened_scores_have_unit_variance() {
        let x = sample();
        let mut pca = Pca::new(2, true);
        let z = pca.fit_transform(&x).unwrap();
        assert_eq!(z.dim(), (8, 2));
        for col in z.columns() {
            let mean = col.sum() / 8.0;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 7.0;
            assert!(mean.abs() < 1e-9);
            assert!((var - 1.0).abs() < 1e-9, "variance {var}");
        }
    }

    #[test]
    fn components_ordered_by_variance() {
        let mut pca = Pca::new(3, false);
        pca.fit(&sample()).unwrap();
        let ev = &pca.state.as_ref().unwrap().explained_variance;
        assert!(ev[0] >= ev[1] && ev[1] >= ev[2]);
    }

    #[test]
    fn clamps_components_to_samples() {
        let x = array![[1.0, 2.0, 3.0, 4.0], [2.0, 1.0, 0.0, 5.0], [0.0, 0.0, 1.0, 1.0]];
        let mut pca = Pca::new(10, true);
        pca.fit(&x).unwrap();
        assert_eq!(pca.output_dim(), Some(3));
    }

    #[test]
    fn wide_and_tall_paths_agree() {
        // The first component is the same whether derived from the covariance
        // or from the Gram matrix of the transposed problem.
        let x = array![[1.0, 2.0, 0.0], [3.0, 1.0, 1.0], [0.0, 4.0, 2.0]];
        let mut tall = Pca::new(1, false);
        tall.fit(&x).unwrap();
        let wide_input = ndarray::concatenate![Axis(1), x, Array2::<f64>::zeros((3, 2))];
        let mut wide = Pca::new(1, false);
        wide.fit(&wide_input).unwrap();
        let a = &tall.state.as_ref().unwrap().components;
        let b = &wide.state.as_ref().unwrap().components;
        for j in 0..3 {
            assert!((a[[0, j]] - b[[0, j]]).abs() < 1e-8);
        }
    }

    #[test]
    fn transform_requires_fit() {
        let pca = Pca::new(2, true);
        assert!(matches!(
            pca.transform(&sample()),
            Err(DichotError::NotFitted(_))
        ));
    }
}
