use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while preparing data for, or running, the classifier.
#[derive(Debug, Error)]
pub enum NewsbertError {
    /// A file could not be opened, read or written.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tabular input could not be parsed.
    #[error("malformed tabular input: {0}")]
    Csv(#[from] csv::Error),

    /// A spreadsheet workbook could not be read.
    #[error("unreadable workbook {path:?}: {message}")]
    Workbook { path: PathBuf, message: String },

    /// A spreadsheet workbook could not be written.
    #[error("workbook write failed: {0}")]
    WorkbookWrite(String),

    /// A required column is absent from the header row.
    #[error("column {column:?} not found in {path:?}")]
    MissingColumn {
        /// The header name that was looked up.
        column: String,
        /// The file that lacks it.
        path: PathBuf,
    },

    /// A label cell is not an integer.
    #[error("row {row}: label {value:?} is not an integer")]
    InvalidLabel {
        /// 1-based data row number (header excluded).
        row: usize,
        /// The raw cell contents.
        value: String,
    },

    /// A label is outside the fixed label set.
    #[error("label {label} is outside the label set")]
    LabelOutOfRange {
        /// The offending label.
        label: i64,
    },

    /// The tokenizer could not be built or failed on an input.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// The pretrained model or a checkpoint could not be loaded.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// A model artifact could not be fetched from the hub.
    #[error("download error: {0}")]
    Download(String),

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Features do not have the configured shape.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// The expected length.
        expected: usize,
        /// The length found.
        actual: usize,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NewsbertError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for newsbert operations.
pub type Result<T> = std::result::Result<T, NewsbertError>;
