//! Error types for the dichot library

use thiserror::Error;

/// Result type alias for dichot operations
pub type Result<T> = std::result::Result<T, DichotError>;

/// Errors raised while reading data, fitting models or writing outputs
#[derive(Error, Debug)]
pub enum DichotError {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// A required column was not found in a tabular input
    #[error("Missing column '{column}' in {source_name}")]
    MissingColumn { column: String, source_name: String },

    /// Input values that cannot be used (non-numeric cells, empty tables, ...)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Array dimensions that do not line up
    #[error("Shape mismatch: expected {expected}, got {got}")]
    Shape { expected: String, got: String },

    /// Formats the tool knows about but does not read or write yet
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A transform or prediction was requested before fitting
    #[error("Not fitted: {0}")]
    NotFitted(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DichotError {
    pub(crate) fn shape(expected: impl ToString, got: impl ToString) -> Self {
        DichotError::Shape {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}
