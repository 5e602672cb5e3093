//! Ensembling pixel-wise predictions to the crown scale

use ndarray::{Array2, Axis};

use crate::data::{unique_sorted, Label};
use crate::error::{DichotError, Result};

/// Mean probability per crown. Rows follow the sorted unique crown ids.
pub fn average(
    predictions: &Array2<f64>,
    crown_ids: &[Label],
) -> Result<(Vec<Label>, Array2<f64>)> {
    if crown_ids.len() != predictions.nrows() {
        return Err(DichotError::shape(
            format!("{} crown ids", predictions.nrows()),
            format!("{} crown ids", crown_ids.len()),
        ));
    }
    let crowns = unique_sorted(crown_ids);
    let mut out = Array2::<f64>::zeros((crowns.len(), predictions.ncols()));
    let mut counts = vec![0usize; crowns.len()];

    for (label, row) in crown_ids.iter().zip(predictions.axis_iter(Axis(0))) {
        // `crowns` is sorted, so the search always hits.
        if let Ok(c) = crowns.binary_search(label) {
            let mut target = out.row_mut(c);
            target += &row;
            counts[c] += 1;
        }
    }
    for (mut row, n) in out.axis_iter_mut(Axis(0)).zip(counts) {
        if n > 0 {
            row /= n as f64;
        }
    }
    Ok((crowns, out))
}

/// Long-format row labels for crown × species output: each crown repeated
/// once per species, species cycling within each crown.
pub fn csv_labels(crowns: &[Label], species: &[Label]) -> (Vec<Label>, Vec<Label>) {
    let mut id_rows = Vec::with_capacity(crowns.len() * species.len());
    let mut sp_rows = Vec::with_capacity(crowns.len() * species.len());
    for crown in crowns {
        for sp in species {
            id_rows.push(crown.clone());
            sp_rows.push(sp.clone());
        }
    }
    (id_rows, sp_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn averages_by_sorted_crown() {
        let p = array![[0.2, 0.8], [0.4, 0.6], [1.0, 0.0], [0.6, 0.4]];
        let crowns = vec![Label::from(7), Label::from(3), Label::from(7), Label::from(3)];
        let (ids, avg) = average(&p, &crowns).unwrap();
        assert_eq!(ids, vec![Label::from(3), Label::from(7)]);
        assert!((avg[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((avg[[1, 0]] - 0.6).abs() < 1e-12);
        assert!((avg[[1, 1]] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn labels_repeat_crowns_and_cycle_species() {
        let (ids, sp) = csv_labels(
            &[Label::from(1), Label::from(2)],
            &[Label::from("a"), Label::from("b"), Label::from("c")],
        );
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[2], Label::from(1));
        assert_eq!(ids[3], Label::from(2));
        assert_eq!(sp[0], Label::from("a"));
        assert_eq!(sp[4], Label::from("b"));
    }

    #[test]
    fn rejects_misaligned_ids() {
        let p = array![[1.0], [0.0]];
        assert!(average(&p, &[Label::from(1)]).is_err());
    }
}
