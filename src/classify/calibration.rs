//! Sigmoid (Platt) probability calibration with stratified cross-validation

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::{Classifier, Estimator, EstimatorSpec};
use crate::error::{DichotError, Result};

const MAX_NEWTON_ITER: usize = 100;
const MIN_STEP: f64 = 1e-10;
const SIGMA: f64 = 1e-12;
const EPS: f64 = 1e-5;

/// `p = 1 / (1 + exp(a * f + b))`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sigmoid {
    pub a: f64,
    pub b: f64,
}

impl Sigmoid {
    pub fn apply(&self, f: f64) -> f64 {
        let v = self.a * f + self.b;
        if v >= 0.0 {
            let e = (-v).exp();
            e / (1.0 + e)
        } else {
            1.0 / (1.0 + v.exp())
        }
    }

    /// Fit Platt's sigmoid on decision values `f` against binary targets,
    /// using smoothed targets and a Newton method with backtracking.
    pub fn fit(f: &[f64], positive: &[bool]) -> Self {
        let prior1 = positive.iter().filter(|p| **p).count() as f64;
        let prior0 = positive.len() as f64 - prior1;
        let hi = (prior1 + 1.0) / (prior1 + 2.0);
        let lo = 1.0 / (prior0 + 2.0);
        let t: Vec<f64> = positive.iter().map(|p| if *p { hi } else { lo }).collect();

        let objective = |a: f64, b: f64| -> f64 {
            f.iter()
                .zip(&t)
                .map(|(fi, ti)| {
                    let v = fi * a + b;
                    if v >= 0.0 {
                        ti * v + (1.0 + (-v).exp()).ln()
                    } else {
                        (ti - 1.0) * v + (1.0 + v.exp()).ln()
                    }
                })
                .sum()
        };

        let mut a = 0.0;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = objective(a, b);

        for _ in 0..MAX_NEWTON_ITER {
            let (mut h11, mut h22, mut h21, mut g1, mut g2) = (SIGMA, SIGMA, 0.0, 0.0, 0.0);
            for (fi, ti) in f.iter().zip(&t) {
                let v = fi * a + b;
                let (p, q) = if v >= 0.0 {
                    let e = (-v).exp();
                    (e / (1.0 + e), 1.0 / (1.0 + e))
                } else {
                    let e = v.exp();
                    (1.0 / (1.0 + e), e / (1.0 + e))
                };
                let d2 = p * q;
                h11 += fi * fi * d2;
                h22 += d2;
                h21 += fi * d2;
                let d1 = ti - p;
                g1 += fi * d1;
                g2 += d1;
            }
            if g1.abs() < EPS && g2.abs() < EPS {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0;
            while step >= MIN_STEP {
                let (na, nb) = (a + step * da, b + step * db);
                let nf = objective(na, nb);
                if nf < fval + 1e-4 * step * gd {
                    a = na;
                    b = nb;
                    fval = nf;
                    break;
                }
                step /= 2.0;
            }
            if step < MIN_STEP {
                log::trace!("sigmoid line search stalled");
                break;
            }
        }
        Sigmoid { a, b }
    }
}

/// One cross-validation fold: an estimator fit on the other folds plus the
/// per-class sigmoids fit on this fold's held-out scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratedFold {
    pub estimator: Estimator,
    pub sigmoids: Vec<Sigmoid>,
}

/// An estimator whose probabilities are sigmoid-calibrated, averaged over
/// the cross-validation folds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigmoidCalibrated {
    pub n_classes: usize,
    pub folds: Vec<CalibratedFold>,
}

/// Stratified fold assignment: members of each class are dealt round-robin.
pub fn stratified_folds(y: &[usize], n_folds: usize) -> Vec<usize> {
    let mut seen = std::collections::BTreeMap::<usize, usize>::new();
    y.iter()
        .map(|c| {
            let n = seen.entry(*c).or_default();
            let fold = *n % n_folds;
            *n += 1;
            fold
        })
        .collect()
}

impl SigmoidCalibrated {
    /// Cross-validated calibration of fresh estimators built from `spec`.
    pub fn fit(
        spec: &EstimatorSpec,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        n_folds: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if n_folds < 2 {
            return Err(DichotError::Config(format!(
                "calibration needs at least 2 folds, got {n_folds}"
            )));
        }
        if y.len() != x.nrows() {
            return Err(DichotError::shape(
                format!("{} labels", x.nrows()),
                format!("{} labels", y.len()),
            ));
        }
        if y.len() < n_folds {
            return Err(DichotError::InvalidData(format!(
                "{} samples cannot fill {n_folds} calibration folds",
                y.len()
            )));
        }

        let assignment = stratified_folds(y, n_folds);
        let mut folds = Vec::with_capacity(n_folds);
        for fold in 0..n_folds {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..y.len()).partition(|&i| assignment[i] == fold);

            let x_train = x.select(Axis(0), &train);
            let y_train: Vec<usize> = train.iter().map(|&i| y[i]).collect();
            let mut estimator = spec.build();
            estimator.fit(&x_train, &y_train, n_classes, None, rng)?;

            let x_test = x.select(Axis(0), &test);
            let scores = estimator.decision_function(&x_test)?;
            let classes: Vec<usize> = if n_classes == 2 {
                vec![1]
            } else {
                (0..n_classes).collect()
            };
            let sigmoids = classes
                .into_iter()
                .map(|k| {
                    let f: Vec<f64> = scores.column(k).to_vec();
                    let positive: Vec<bool> = test.iter().map(|&i| y[i] == k).collect();
                    Sigmoid::fit(&f, &positive)
                })
                .collect();

            log::debug!(
                "calibrated {} fold {fold}: {} train / {} held out",
                spec.name(),
                train.len(),
                test.len()
            );
            folds.push(CalibratedFold {
                estimator,
                sigmoids,
            });
        }

        Ok(SigmoidCalibrated { n_classes, folds })
    }

    /// Calibrated probabilities averaged over folds.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.folds.is_empty() {
            return Err(DichotError::NotFitted("calibrated model".into()));
        }
        let k = self.n_classes;
        let mut total = Array2::<f64>::zeros((x.nrows(), k));
        for fold in &self.folds {
            let scores = fold.estimator.decision_function(x)?;
            let mut proba = Array2::<f64>::zeros((x.nrows(), k));
            if k == 2 {
                for (i, f) in scores.column(1).iter().enumerate() {
                    let p = fold.sigmoids[0].apply(*f);
                    proba[[i, 0]] = 1.0 - p;
                    proba[[i, 1]] = p;
                }
            } else {
                for (j, sigmoid) in fold.sigmoids.iter().enumerate() {
                    for (i, f) in scores.column(j).iter().enumerate() {
                        proba[[i, j]] = sigmoid.apply(*f);
                    }
                }
                for mut row in proba.rows_mut() {
                    let s = row.sum();
                    if s > 0.0 {
                        row /= s;
                    } else {
                        row.fill(1.0 / k as f64);
                    }
                }
            }
            total += &proba;
        }
        total /= self.folds.len() as f64;
        Ok(total)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        Ok(super::argmax_rows(&self.predict_proba(x)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ForestParams;
    use rand::SeedableRng;

    #[test]
    fn sigmoid_is_decreasing_in_score_when_a_is_negative() {
        let f: Vec<f64> = (0..40).map(|i| i as f64 / 10.0 - 2.0).collect();
        let positive: Vec<bool> = f.iter().map(|v| *v > 0.3).collect();
        let s = Sigmoid::fit(&f, &positive);
        assert!(s.a < 0.0, "{s:?}");
        assert!(s.apply(2.0) > 0.9);
        assert!(s.apply(-2.0) < 0.1);
    }

    #[test]
    fn sigmoid_handles_one_sided_targets() {
        let f = vec![0.1, 0.2, 0.3];
        let s = Sigmoid::fit(&f, &[false, false, false]);
        let p = s.apply(0.2);
        assert!(p.is_finite() && p < 0.5);
    }

    #[test]
    fn folds_are_stratified() {
        let y = [0, 0, 0, 1, 1, 1, 0];
        assert_eq!(stratified_folds(&y, 3), vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn calibrated_forest_outputs_distributions() {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..60 {
            let class = i % 3;
            rows.extend_from_slice(&[class as f64 + (i as f64 * 0.7).sin() * 0.3, (i % 5) as f64]);
            y.push(class);
        }
        let x = Array2::from_shape_vec((60, 2), rows).unwrap();
        let spec = EstimatorSpec::RandomForest(ForestParams {
            n_estimators: 10,
            ..ForestParams::default()
        });
        let mut rng = StdRng::seed_from_u64(2);
        let cal = SigmoidCalibrated::fit(&spec, &x, &y, 3, 3, &mut rng).unwrap();
        assert_eq!(cal.folds.len(), 3);
        assert!(cal.folds.iter().all(|f| f.sigmoids.len() == 3));

        let proba = cal.predict_proba(&x).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
        let hits = cal
            .predict(&x)
            .unwrap()
            .iter()
            .zip(&y)
            .filter(|(a, b)| a == b)
            .count();
        assert!(hits >= 54, "only {hits} of 60 correct");
    }

    #[test]
    fn needs_two_folds() {
        let x = Array2::<f64>::zeros((4, 1));
        let spec = EstimatorSpec::defaults().remove(0);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(SigmoidCalibrated::fit(&spec, &x, &[0, 1, 0, 1], 2, 1, &mut rng).is_err());
    }
}
