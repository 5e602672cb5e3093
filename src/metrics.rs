//! Classification metrics and the verbose-mode report

use ndarray::Array2;

use crate::classify::argmax_rows;

const CLIP: f64 = 1e-15;

/// Fraction of predictions equal to the truth.
pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let hits = y_true.iter().zip(y_pred).filter(|(a, b)| a == b).count();
    hits as f64 / y_true.len() as f64
}

/// Mean negative log-likelihood of the true class. Probabilities are
/// clipped to `[1e-15, 1 - 1e-15]` and rows renormalized.
pub fn log_loss(y_true: &[usize], proba: &Array2<f64>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let total: f64 = y_true
        .iter()
        .zip(proba.rows())
        .map(|(&c, row)| {
            let clipped: Vec<f64> = row.iter().map(|p| p.clamp(CLIP, 1.0 - CLIP)).collect();
            let norm: f64 = clipped.iter().sum();
            -(clipped.get(c).copied().unwrap_or(CLIP) / norm).ln()
        })
        .sum();
    total / y_true.len() as f64
}

/// Counts indexed `[true, predicted]`.
pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> Array2<usize> {
    let mut m = Array2::<usize>::zeros((n_classes, n_classes));
    for (&t, &p) in y_true.iter().zip(y_pred) {
        if t < n_classes && p < n_classes {
            m[[t, p]] += 1;
        }
    }
    m
}

/// Scores for one model (or the ensemble) on a labelled set.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub name: String,
    pub accuracy: f64,
    pub log_loss: f64,
}

impl Score {
    pub fn from_proba(name: impl Into<String>, y_true: &[usize], proba: &Array2<f64>) -> Self {
        Score {
            name: name.into(),
            accuracy: accuracy(y_true, &argmax_rows(proba)),
            log_loss: log_loss(y_true, proba),
        }
    }
}

/// Log the accuracy and log loss of a set of predictions.
pub fn model_report(score: &Score) {
    log::info!("[{}] Mean accuracy score: {:.4}", score.name, score.accuracy);
    log::info!("[{}] Mean log loss score: {:.4}", score.name, score.log_loss);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn accuracy_counts_hits() {
        assert_eq!(accuracy(&[0, 1, 2, 1], &[0, 1, 1, 1]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn log_loss_matches_hand_computation() {
        let p = array![[0.9, 0.1], [0.2, 0.8]];
        let expected = -(0.9f64.ln() + 0.8f64.ln()) / 2.0;
        assert!((log_loss(&[0, 1], &p) - expected).abs() < 1e-12);
    }

    #[test]
    fn log_loss_clips_zero_probabilities() {
        let p = array![[1.0, 0.0]];
        let loss = log_loss(&[1], &p);
        assert!(loss.is_finite());
        assert!((loss - -(1e-15f64).ln()).abs() < 1e-6);
    }

    #[test]
    fn confusion_rows_are_truth() {
        let m = confusion_matrix(&[0, 0, 1], &[0, 1, 1], 2);
        assert_eq!(m, array![[1, 1], [0, 1]]);
    }
}
