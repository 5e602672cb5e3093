use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, AsArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeListArray,
    ListArray,
};
use arrow::datatypes::DataType;
use ndarray::Array2;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::model::{BandTable, Label, SpeciesTable, SpectralTable};
use crate::error::{DichotError, Result};

const RASTER_EXTENSIONS: &[&str] = &["tif", "tiff", "img", "dat", "bsq", "bil", "bip", "vrt"];
const HDF_EXTENSIONS: &[&str] = &["h5", "hdf", "hdf5", "he5"];

/// Column holding per-sample spectra in list-layout Parquet files.
const LIST_COLUMNS: &[&str] = &["reflectance", "y"];

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Whether the path looks like a delimited text table.
pub fn is_csv(path: &Path) -> bool {
    matches!(extension(path).as_str(), "csv" | "tsv")
}

/// Whether the path looks like an image raster.
pub fn is_raster(path: &Path) -> bool {
    RASTER_EXTENSIONS.contains(&extension(path).as_str())
}

/// Load per-sample spectra. Dispatch by extension.
///
/// Supported formats:
/// * `.csv` / `.tsv` – first column is the crown id, every other column a band
/// * `.parquet`      – same flat layout, or a crown id column plus a
///                     `reflectance` list column
pub fn load_spectra(path: &Path) -> Result<SpectralTable> {
    let ext = extension(path);
    match ext.as_str() {
        "csv" => load_spectra_csv(path, b','),
        "tsv" => load_spectra_csv(path, b'\t'),
        "parquet" | "pq" => load_spectra_parquet(path),
        e if RASTER_EXTENSIONS.contains(&e) => Err(DichotError::Unsupported(format!(
            "raster input ({}) is not supported yet; export pixels to CSV",
            path.display()
        ))),
        e if HDF_EXTENSIONS.contains(&e) => Err(DichotError::Unsupported(format!(
            "HDF input ({}) is not supported yet",
            path.display()
        ))),
        other => Err(DichotError::Unsupported(format!(
            "file extension .{other} ({})",
            path.display()
        ))),
    }
}

/// Read the crown → species table (`crown_id`, `species_id`, `species`).
pub fn load_species(path: &Path) -> Result<SpeciesTable> {
    load_taxa(path, "species_id", "species")
}

/// Read the crown → genus table (`crown_id`, `genus_id`, `genus`).
pub fn load_genus(path: &Path) -> Result<SpeciesTable> {
    load_taxa(path, "genus_id", "genus")
}

/// Read wavelengths and good-band flags (`Wavelength`, `Flag`; flag 1 = good).
pub fn load_bands(path: &Path) -> Result<BandTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let wl_idx = column_index(&headers, "Wavelength", path)?;
    let flag_idx = column_index(&headers, "Flag", path)?;

    let mut wavelengths = Vec::new();
    let mut good = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        wavelengths.push(parse_float(record.get(wl_idx).unwrap_or(""), row_no, "Wavelength")?);
        let flag = parse_float(record.get(flag_idx).unwrap_or(""), row_no, "Flag")?;
        good.push(flag == 1.0);
    }
    Ok(BandTable { wavelengths, good })
}

// ---------------------------------------------------------------------------
// CSV loaders
// ---------------------------------------------------------------------------

/// CSV layout: header row, crown id in the first column, one float column
/// per band after that.
fn load_spectra_csv(path: &Path, delimiter: u8) -> Result<SpectralTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if headers.len() < 2 {
        return Err(DichotError::InvalidData(format!(
            "{}: expected a crown id column and at least one band column",
            path.display()
        )));
    }
    let columns = headers[1..].to_vec();
    let n_bands = columns.len();

    let mut crown_ids = Vec::new();
    let mut flat = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() != headers.len() {
            return Err(DichotError::InvalidData(format!(
                "row {row_no}: {} fields, header has {}",
                record.len(),
                headers.len()
            )));
        }
        crown_ids.push(Label::parse(record.get(0).unwrap_or("")));
        for (j, cell) in record.iter().skip(1).enumerate() {
            flat.push(parse_float(cell, row_no, &columns[j])?);
        }
    }

    let features = Array2::from_shape_vec((crown_ids.len(), n_bands), flat)
        .map_err(|e| DichotError::shape(format!("{} x {n_bands}", crown_ids.len()), e))?;
    log::debug!(
        "read {} samples x {} bands from {}",
        crown_ids.len(),
        n_bands,
        path.display()
    );
    Ok(SpectralTable {
        crown_ids,
        features,
        columns,
    })
}

fn load_taxa(path: &Path, id_column: &str, name_column: &str) -> Result<SpeciesTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let crown_idx = column_index(&headers, "crown_id", path)?;
    let id_idx = column_index(&headers, id_column, path)?;
    let name_idx = column_index(&headers, name_column, path)?;

    let mut table = SpeciesTable::default();
    for result in reader.records() {
        let record = result?;
        table.crown_ids.push(Label::parse(record.get(crown_idx).unwrap_or("")));
        table.taxon_ids.push(Label::parse(record.get(id_idx).unwrap_or("")));
        table
            .names
            .push(record.get(name_idx).unwrap_or("").trim().to_string());
    }
    Ok(table)
}

fn column_index(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| DichotError::MissingColumn {
            column: name.to_string(),
            source_name: path.display().to_string(),
        })
}

fn parse_float(s: &str, row: usize, col: &str) -> Result<f64> {
    s.trim().parse::<f64>().map_err(|_| {
        DichotError::InvalidData(format!("row {row}, column {col}: '{s}' is not a number"))
    })
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file of spectra.
///
/// Expected schema: the first column holds crown ids (string or integer).
/// Either a `reflectance` (or `y`) List<Float64> column carries the whole
/// spectrum, or every remaining column is a numeric band.
fn load_spectra_parquet(path: &Path) -> Result<SpectralTable> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let reader = builder.build()?;

    let mut crown_ids = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut columns: Option<Vec<String>> = None;

    for batch_result in reader {
        let batch = batch_result?;
        let schema = batch.schema();
        let n_rows = batch.num_rows();
        if schema.fields().len() < 2 {
            return Err(DichotError::InvalidData(format!(
                "{}: expected a crown id column and band data",
                path.display()
            )));
        }

        let crown_col = batch.column(0);
        let list_idx = LIST_COLUMNS
            .iter()
            .find_map(|name| schema.index_of(name).ok())
            .filter(|i| {
                matches!(
                    schema.field(*i).data_type(),
                    DataType::List(_) | DataType::LargeList(_)
                )
            });

        let band_cols: Vec<(usize, String)> = match list_idx {
            Some(i) => vec![(i, schema.field(i).name().clone())],
            None => schema
                .fields()
                .iter()
                .enumerate()
                .skip(1)
                .map(|(i, f)| (i, f.name().clone()))
                .collect(),
        };

        for row in 0..n_rows {
            crown_ids.push(extract_label(crown_col, row)?);
            let spectrum = match list_idx {
                Some(i) => extract_f64_list(batch.column(i), row)?,
                None => band_cols
                    .iter()
                    .map(|(i, name)| extract_f64(batch.column(*i), row, name))
                    .collect::<Result<Vec<f64>>>()?,
            };
            if let Some(first) = rows.first() {
                if first.len() != spectrum.len() {
                    return Err(DichotError::shape(
                        format!("{} bands", first.len()),
                        format!("{} bands at row {}", spectrum.len(), rows.len()),
                    ));
                }
            }
            rows.push(spectrum);
        }

        if columns.is_none() {
            columns = Some(match list_idx {
                Some(_) => {
                    let n = rows.first().map(|r| r.len()).unwrap_or(0);
                    (0..n).map(|b| format!("band_{}", b + 1)).collect()
                }
                None => band_cols.into_iter().map(|(_, n)| n).collect(),
            });
        }
    }

    let n_bands = rows.first().map(|r| r.len()).unwrap_or(0);
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let features = Array2::from_shape_vec((crown_ids.len(), n_bands), flat)
        .map_err(|e| DichotError::shape(format!("{} x {n_bands}", crown_ids.len()), e))?;
    Ok(SpectralTable {
        crown_ids,
        features,
        columns: columns.unwrap_or_default(),
    })
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        return Err(DichotError::InvalidData(format!("row {row}: null spectrum")));
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| DichotError::InvalidData("expected ListArray".into()))?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .ok_or_else(|| DichotError::InvalidData("expected LargeListArray".into()))?
            .value(row),
        other => {
            return Err(DichotError::InvalidData(format!(
                "expected List or LargeList column, got {other:?}"
            )))
        }
    };

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr
            .iter()
            .map(|v| v.unwrap_or(f32::NAN) as f64)
            .collect())
    } else {
        Err(DichotError::InvalidData(format!(
            "list inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )))
    }
}

/// Extract a single numeric band value.
fn extract_f64(col: &Arc<dyn Array>, row: usize, name: &str) -> Result<f64> {
    if col.is_null(row) {
        return Err(DichotError::InvalidData(format!(
            "row {row}, column {name}: null value"
        )));
    }
    let any = col.as_any();
    if let Some(arr) = any.downcast_ref::<Float64Array>() {
        Ok(arr.value(row))
    } else if let Some(arr) = any.downcast_ref::<Float32Array>() {
        Ok(arr.value(row) as f64)
    } else if let Some(arr) = any.downcast_ref::<Int64Array>() {
        Ok(arr.value(row) as f64)
    } else if let Some(arr) = any.downcast_ref::<Int32Array>() {
        Ok(arr.value(row) as f64)
    } else {
        Err(DichotError::InvalidData(format!(
            "column {name} has type {:?}, expected a numeric band",
            col.data_type()
        )))
    }
}

/// Extract a crown id from an Arrow column.
fn extract_label(col: &Arc<dyn Array>, row: usize) -> Result<Label> {
    if col.is_null(row) {
        return Err(DichotError::InvalidData(format!("row {row}: null crown id")));
    }
    match col.data_type() {
        DataType::Utf8 => Ok(Label::parse(col.as_string::<i32>().value(row))),
        DataType::LargeUtf8 => Ok(Label::parse(col.as_string::<i64>().value(row))),
        DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64 => {
            let any = col.as_any();
            if let Some(arr) = any.downcast_ref::<Int64Array>() {
                Ok(Label::Integer(arr.value(row)))
            } else if let Some(arr) = any.downcast_ref::<Int32Array>() {
                Ok(Label::Integer(arr.value(row) as i64))
            } else {
                Ok(Label::parse(&extract_f64(col, row, "crown_id")?.to_string()))
            }
        }
        other => Err(DichotError::InvalidData(format!(
            "crown id column has unsupported type {other:?}"
        ))),
    }
}
