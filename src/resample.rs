//! Class-balanced resampling of feature data prior to classification

use ndarray::{Array2, Axis};
use rand::Rng;

use crate::data::{unique_sorted, Label};
use crate::error::{DichotError, Result};

/// Output of [`uniform`]: resampled rows, class index per row, and the
/// source row each draw came from.
#[derive(Debug, Clone)]
pub struct Resampled {
    pub x: Array2<f64>,
    /// Class index `0..n_labels`, in sorted label order.
    pub y: Vec<usize>,
    pub source: Vec<usize>,
    pub classes: Vec<Label>,
}

impl Resampled {
    /// Carry an aligned per-sample array through the same draws.
    pub fn carry<T: Clone>(&self, other: &[T]) -> Vec<T> {
        self.source.iter().map(|&i| other[i].clone()).collect()
    }
}

/// Draw `n_per_class` rows with replacement from every class.
pub fn uniform<R: Rng + ?Sized>(
    features: &Array2<f64>,
    labels: &[Label],
    n_per_class: usize,
    rng: &mut R,
) -> Result<Resampled> {
    if labels.len() != features.nrows() {
        return Err(DichotError::shape(
            format!("{} labels", features.nrows()),
            format!("{} labels", labels.len()),
        ));
    }
    let classes = unique_sorted(labels);
    let mut source = Vec::with_capacity(classes.len() * n_per_class);
    let mut y = Vec::with_capacity(classes.len() * n_per_class);

    for (class_idx, class) in classes.iter().enumerate() {
        let members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| *l == class)
            .map(|(i, _)| i)
            .collect();
        for _ in 0..n_per_class {
            source.push(members[rng.gen_range(0..members.len())]);
            y.push(class_idx);
        }
    }

    Ok(Resampled {
        x: features.select(Axis(0), &source),
        y,
        source,
        classes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn balances_classes() {
        let x = Array2::from_shape_fn((6, 2), |(i, j)| (i * 10 + j) as f64);
        let labels: Vec<Label> = ["b", "a", "a", "a", "a", "b"]
            .iter()
            .map(|s| Label::from(*s))
            .collect();
        let mut rng = StdRng::seed_from_u64(7);
        let out = uniform(&x, &labels, 5, &mut rng).unwrap();

        assert_eq!(out.x.nrows(), 10);
        assert_eq!(out.classes, vec![Label::from("a"), Label::from("b")]);
        assert_eq!(&out.y[..5], &[0; 5]);
        assert_eq!(&out.y[5..], &[1; 5]);
        for (row, &src) in out.source.iter().enumerate() {
            assert_eq!(out.x[[row, 0]], (src * 10) as f64);
            assert_eq!(labels[src], out.classes[out.y[row]]);
        }
        let crowns: Vec<usize> = (0..6).collect();
        assert_eq!(out.carry(&crowns), out.source);
    }

    #[test]
    fn same_seed_same_draws() {
        let x = Array2::from_shape_fn((4, 1), |(i, _)| i as f64);
        let labels = vec![Label::from(1), Label::from(1), Label::from(2), Label::from(2)];
        let a = uniform(&x, &labels, 8, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = uniform(&x, &labels, 8, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a.source, b.source);
    }
}
