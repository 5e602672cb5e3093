//! Crown-to-species alignment and class weighting

use std::collections::BTreeMap;

use crate::data::{unique_sorted, Label, SpeciesTable};

/// Result of aligning sample crowns with the species table.
#[derive(Debug, Clone)]
pub struct SpeciesMatch {
    /// Unique species ids present in the species table, sorted.
    pub unique_labels: Vec<Label>,
    /// Unique crown ids present in the samples, sorted.
    pub unique_crowns: Vec<Label>,
    /// Species id of each sample's crown, `None` when the crown is unlisted.
    pub crown_labels: Vec<Option<Label>>,
}

/// Align each sample's crown id with the species id recorded for that crown.
pub fn match_species_ids(crown_ids: &[Label], species: &SpeciesTable) -> SpeciesMatch {
    let lookup: BTreeMap<&Label, &Label> = species
        .crown_ids
        .iter()
        .zip(species.taxon_ids.iter())
        .collect();

    let crown_labels = crown_ids
        .iter()
        .map(|c| lookup.get(c).map(|l| (*l).clone()))
        .collect();

    SpeciesMatch {
        unique_labels: unique_sorted(&species.taxon_ids),
        unique_crowns: unique_sorted(crown_ids),
        crown_labels,
    }
}

/// Balanced per-sample weights: `n_samples / (n_classes * count(class))`.
pub fn sample_weights(y: &[usize]) -> Vec<f64> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &c in y {
        *counts.entry(c).or_default() += 1;
    }
    let n = y.len() as f64;
    let k = counts.len() as f64;
    y.iter()
        .map(|c| n / (k * counts[c] as f64))
        .collect()
}

/// Map labels to class indices given the sorted class list.
pub fn encode(labels: &[Label], classes: &[Label]) -> Option<Vec<usize>> {
    labels
        .iter()
        .map(|l| classes.binary_search(l).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_samples_with_species() {
        let species = SpeciesTable {
            crown_ids: vec![Label::from(10), Label::from(11), Label::from(12)],
            taxon_ids: vec![Label::from(2), Label::from(1), Label::from(2)],
            names: vec!["b".into(), "a".into(), "b".into()],
        };
        let crowns = vec![
            Label::from(11),
            Label::from(10),
            Label::from(10),
            Label::from(99),
        ];
        let m = match_species_ids(&crowns, &species);
        assert_eq!(m.unique_labels, vec![Label::from(1), Label::from(2)]);
        assert_eq!(
            m.unique_crowns,
            vec![Label::from(10), Label::from(11), Label::from(99)]
        );
        assert_eq!(
            m.crown_labels,
            vec![
                Some(Label::from(1)),
                Some(Label::from(2)),
                Some(Label::from(2)),
                None
            ]
        );
    }

    #[test]
    fn balanced_weights() {
        let w = sample_weights(&[0, 0, 0, 1]);
        // 4 / (2 * 3) and 4 / (2 * 1)
        assert!((w[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((w[3] - 2.0).abs() < 1e-12);
        let total: f64 = w.iter().sum();
        assert!((total - 4.0).abs() < 1e-12);
    }

    #[test]
    fn encodes_against_sorted_classes() {
        let classes = vec![Label::from(1), Label::from(5)];
        assert_eq!(
            encode(&[Label::from(5), Label::from(1)], &classes),
            Some(vec![1, 0])
        );
        assert_eq!(encode(&[Label::from(3)], &classes), None);
    }
}
