//! Train/test partitioning, per sample or per whole crown

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::Label;
use crate::error::{DichotError, Result};

/// How hold-out samples are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    /// Stratified over individual samples (pixels).
    Sample,
    /// Stratified over crowns; a crown never straddles both partitions.
    Crown,
}

/// Row indices of each partition, sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

fn n_test(n: usize, fraction: f64) -> usize {
    if n < 2 {
        return 0;
    }
    ((n as f64 * fraction).round() as usize).min(n - 1)
}

/// Partition samples so each class keeps at least one training member.
pub fn train_test<R: Rng + ?Sized>(
    crowns: &[Label],
    labels: &[Label],
    method: SplitMethod,
    test_fraction: f64,
    rng: &mut R,
) -> Result<Split> {
    if crowns.len() != labels.len() {
        return Err(DichotError::shape(
            format!("{} crown ids", labels.len()),
            format!("{} crown ids", crowns.len()),
        ));
    }
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(DichotError::Config(format!(
            "test fraction must be in [0, 1), got {test_fraction}"
        )));
    }

    let mut test = BTreeSet::new();
    match method {
        SplitMethod::Sample => {
            let mut by_class: BTreeMap<&Label, Vec<usize>> = BTreeMap::new();
            for (i, l) in labels.iter().enumerate() {
                by_class.entry(l).or_default().push(i);
            }
            for (_, mut members) in by_class {
                members.shuffle(rng);
                let k = n_test(members.len(), test_fraction);
                test.extend(members.into_iter().take(k));
            }
        }
        SplitMethod::Crown => {
            let mut crowns_by_class: BTreeMap<&Label, BTreeSet<&Label>> = BTreeMap::new();
            for (c, l) in crowns.iter().zip(labels) {
                crowns_by_class.entry(l).or_default().insert(c);
            }
            let mut test_crowns = BTreeSet::new();
            for (_, members) in crowns_by_class {
                let mut members: Vec<&Label> = members.into_iter().collect();
                members.shuffle(rng);
                let k = n_test(members.len(), test_fraction);
                test_crowns.extend(members.into_iter().take(k));
            }
            test.extend(
                crowns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| test_crowns.contains(c))
                    .map(|(i, _)| i),
            );
        }
    }

    let train = (0..labels.len()).filter(|i| !test.contains(i)).collect();
    Ok(Split {
        train,
        test: test.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixture() -> (Vec<Label>, Vec<Label>) {
        // 8 crowns, 2 species, 3 samples per crown
        let mut crowns = Vec::new();
        let mut labels = Vec::new();
        for crown in 0..8i64 {
            for _ in 0..3 {
                crowns.push(Label::from(crown));
                labels.push(Label::from(if crown < 4 { "PIPA" } else { "QULA" }));
            }
        }
        (crowns, labels)
    }

    #[test]
    fn crown_split_never_shares_crowns() {
        let (crowns, labels) = fixture();
        let mut rng = StdRng::seed_from_u64(11);
        let split = train_test(&crowns, &labels, SplitMethod::Crown, 0.25, &mut rng).unwrap();
        let train_crowns: BTreeSet<_> = split.train.iter().map(|&i| &crowns[i]).collect();
        let test_crowns: BTreeSet<_> = split.test.iter().map(|&i| &crowns[i]).collect();
        assert!(train_crowns.is_disjoint(&test_crowns));
        // one of four crowns per species
        assert_eq!(test_crowns.len(), 2);
        assert_eq!(split.train.len() + split.test.len(), crowns.len());
    }

    #[test]
    fn sample_split_is_stratified() {
        let (crowns, labels) = fixture();
        let mut rng = StdRng::seed_from_u64(5);
        let split = train_test(&crowns, &labels, SplitMethod::Sample, 0.25, &mut rng).unwrap();
        assert_eq!(split.test.len(), 6);
        let pipa = split
            .test
            .iter()
            .filter(|&&i| labels[i] == Label::from("PIPA"))
            .count();
        assert_eq!(pipa, 3);
        assert!(split.test.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn singleton_class_stays_in_train() {
        let crowns = vec![Label::from(1), Label::from(2), Label::from(3)];
        let labels = vec![Label::from("a"), Label::from("a"), Label::from("b")];
        let mut rng = StdRng::seed_from_u64(0);
        let split = train_test(&crowns, &labels, SplitMethod::Crown, 0.9, &mut rng).unwrap();
        assert!(split.train.contains(&2));
        assert_eq!(split.test.len(), 1);
    }

    #[test]
    fn rejects_bad_fraction() {
        let (crowns, labels) = fixture();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(train_test(&crowns, &labels, SplitMethod::Sample, 1.5, &mut rng).is_err());
    }
}
