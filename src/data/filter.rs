use ndarray::{Array2, Axis};

use super::model::{BandTable, SpectralTable};
use crate::error::{DichotError, Result};

// ---------------------------------------------------------------------------
// Boolean masks over rows (samples) and columns (bands)
// ---------------------------------------------------------------------------

/// Indices where the mask is `true`.
pub fn mask_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter(|(_, keep)| **keep)
        .map(|(i, _)| i)
        .collect()
}

/// Keep the columns whose mask entry is `true`.
pub fn select_columns(x: &Array2<f64>, mask: &[bool]) -> Result<Array2<f64>> {
    if mask.len() != x.ncols() {
        return Err(DichotError::shape(
            format!("{} band flags", x.ncols()),
            format!("{} band flags", mask.len()),
        ));
    }
    Ok(x.select(Axis(1), &mask_indices(mask)))
}

/// Keep the rows whose mask entry is `true`.
pub fn select_rows(x: &Array2<f64>, mask: &[bool]) -> Result<Array2<f64>> {
    if mask.len() != x.nrows() {
        return Err(DichotError::shape(
            format!("{} row flags", x.nrows()),
            format!("{} row flags", mask.len()),
        ));
    }
    Ok(x.select(Axis(0), &mask_indices(mask)))
}

/// Pick items of a per-sample vector by index.
pub fn take<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| items[i].clone()).collect()
}

/// Subset a table to its good bands.
pub fn good_bands(table: &SpectralTable, bands: &BandTable) -> Result<SpectralTable> {
    let features = select_columns(&table.features, &bands.good)?;
    let columns = mask_indices(&bands.good)
        .into_iter()
        .filter_map(|i| table.columns.get(i).cloned())
        .collect();
    Ok(SpectralTable {
        crown_ids: table.crown_ids.clone(),
        features,
        columns,
    })
}

/// Subset a table to the rows whose mask entry is `true`.
pub fn rows(table: &SpectralTable, mask: &[bool]) -> Result<SpectralTable> {
    let features = select_rows(&table.features, mask)?;
    Ok(SpectralTable {
        crown_ids: take(&table.crown_ids, &mask_indices(mask)),
        features,
        columns: table.columns.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Label;
    use ndarray::array;

    #[test]
    fn selects_columns_by_flag() {
        let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let out = select_columns(&x, &[true, false, true]).unwrap();
        assert_eq!(out, array![[1.0, 3.0], [4.0, 6.0]]);
    }

    #[test]
    fn mask_length_must_match() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(matches!(
            select_columns(&x, &[true]),
            Err(DichotError::Shape { .. })
        ));
        assert!(matches!(
            select_rows(&x, &[true, true, false]),
            Err(DichotError::Shape { .. })
        ));
    }

    #[test]
    fn table_rows_keep_crowns_aligned() {
        let table = SpectralTable {
            crown_ids: vec![Label::from(1), Label::from(2), Label::from(3)],
            features: array![[1.0], [2.0], [3.0]],
            columns: vec!["b1".into()],
        };
        let out = rows(&table, &[true, false, true]).unwrap();
        assert_eq!(out.crown_ids, vec![Label::from(1), Label::from(3)]);
        assert_eq!(out.features, array![[1.0], [3.0]]);
    }
}
