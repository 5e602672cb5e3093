use std::collections::BTreeSet;
use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Label – a crown or species identifier
// ---------------------------------------------------------------------------

/// An identifier read from a CSV cell. Crown and species ids are integers in
/// most field inventories but free text in others, so both are kept.
/// Used as a `BTreeSet` key downstream, so `Label` must be `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Integer(i64),
    Text(String),
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Label::Integer(a), Label::Integer(b)) => a.cmp(b),
            (Label::Text(a), Label::Text(b)) => a.cmp(b),
            (Label::Integer(_), Label::Text(_)) => Ordering::Less,
            (Label::Text(_), Label::Integer(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Integer(i) => write!(f, "{i}"),
            Label::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Label {
    fn from(v: i64) -> Self {
        Label::Integer(v)
    }
}

impl From<&str> for Label {
    fn from(v: &str) -> Self {
        Label::Text(v.to_string())
    }
}

impl Label {
    /// Guess the type of a raw cell. Integral floats such as `"12.0"`
    /// collapse to integers so ids written by float-typed exporters match.
    /// Any numeric spelling collapses the same way: `"007"` and `"7"` are
    /// one crown, as are `"1e2"` and `"100"`.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if let Ok(i) = s.parse::<i64>() {
            return Label::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                return Label::Integer(f as i64);
            }
        }
        Label::Text(s.to_string())
    }
}

/// Sorted unique values, the way every per-class loop in the pipeline
/// enumerates classes and crowns.
pub fn unique_sorted(labels: &[Label]) -> Vec<Label> {
    labels
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// ---------------------------------------------------------------------------
// SpectralTable – per-sample reflectance with crown ids
// ---------------------------------------------------------------------------

/// Spectra for a set of samples (pixels). Row `i` of `features` belongs to
/// crown `crown_ids[i]`.
#[derive(Debug, Clone)]
pub struct SpectralTable {
    pub crown_ids: Vec<Label>,
    /// Shape `(n_samples, n_bands)`.
    pub features: Array2<f64>,
    /// Header names of the feature columns.
    pub columns: Vec<String>,
}

impl SpectralTable {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.crown_ids.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.crown_ids.is_empty()
    }

    pub fn n_bands(&self) -> usize {
        self.features.ncols()
    }

    /// Unique crown ids, sorted.
    pub fn unique_crowns(&self) -> Vec<Label> {
        unique_sorted(&self.crown_ids)
    }
}

// ---------------------------------------------------------------------------
// SpeciesTable – crown → species lookup
// ---------------------------------------------------------------------------

/// One row per crown mapping it to a taxon code and a name. Genus tables
/// share the layout.
#[derive(Debug, Clone, Default)]
pub struct SpeciesTable {
    pub crown_ids: Vec<Label>,
    pub taxon_ids: Vec<Label>,
    pub names: Vec<String>,
}

impl SpeciesTable {
    pub fn len(&self) -> usize {
        self.crown_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crown_ids.is_empty()
    }

    /// Name associated with a taxon code (first match).
    pub fn name_of(&self, taxon: &Label) -> Option<&str> {
        self.taxon_ids
            .iter()
            .position(|t| t == taxon)
            .map(|i| self.names[i].as_str())
    }
}

// ---------------------------------------------------------------------------
// BandTable – wavelengths and good-band flags
// ---------------------------------------------------------------------------

/// Wavelength per band plus the flag marking bands usable for analysis
/// (water-absorption and noisy detector bands are flagged out).
#[derive(Debug, Clone)]
pub struct BandTable {
    pub wavelengths: Vec<f64>,
    pub good: Vec<bool>,
}

impl BandTable {
    /// All bands good; used when no band file is given.
    pub fn all_good(n: usize) -> Self {
        BandTable {
            wavelengths: (0..n).map(|i| i as f64).collect(),
            good: vec![true; n],
        }
    }

    pub fn len(&self) -> usize {
        self.good.len()
    }

    pub fn is_empty(&self) -> bool {
        self.good.is_empty()
    }

    pub fn n_good(&self) -> usize {
        self.good.iter().filter(|g| **g).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_guesses_integers_and_text() {
        assert_eq!(Label::parse("42"), Label::Integer(42));
        assert_eq!(Label::parse(" 7 "), Label::Integer(7));
        assert_eq!(Label::parse("3.0"), Label::Integer(3));
        assert_eq!(Label::parse("PIPA"), Label::Text("PIPA".into()));
        assert_eq!(Label::parse("1.5"), Label::Text("1.5".into()));
    }

    #[test]
    fn numeric_spellings_share_one_label() {
        assert_eq!(Label::parse("007"), Label::parse("7"));
        assert_eq!(Label::parse("1e2"), Label::Integer(100));
        assert_eq!(Label::parse("-0"), Label::Integer(0));
    }

    #[test]
    fn integers_sort_before_text() {
        let labels = vec![
            Label::from("b"),
            Label::from(10),
            Label::from("a"),
            Label::from(2),
            Label::from(10),
        ];
        assert_eq!(
            unique_sorted(&labels),
            vec![Label::from(2), Label::from(10), Label::from("a"), Label::from("b")]
        );
    }

    #[test]
    fn labels_serialize_untagged() {
        let json = serde_json::to_string(&vec![Label::from(3), Label::from("QULA")]).unwrap();
        assert_eq!(json, r#"[3,"QULA"]"#);
        let back: Vec<Label> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Label::from(3), Label::from("QULA")]);
    }
}
