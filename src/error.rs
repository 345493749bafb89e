//! Error types for the tcid50 library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum TiterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Xlsx(#[from] calamine::Error),

    /// Missing or conflicting input source (pasted text vs file).
    #[error("{0}")]
    InputSource(String),

    /// The rejected path is kept for callers; the message is fixed.
    #[error("File does not have a supported file extension (.csv, .tsv, .xlsx)")]
    UnsupportedExtension(String),

    #[error("Missing column '{0}' in input")]
    MissingColumn(String),

    #[error("Invalid value '{value}' at row {row}, column '{column}'")]
    InvalidValue {
        value: String,
        row: usize,
        column: String,
    },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, TiterError>;
