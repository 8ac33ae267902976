//! Error types shared by every pipeline stage.

use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors raised while loading, indexing, or transforming a price table.
///
/// Every variant is fatal for the call that produced it. The pipeline runs
/// over data that is already resident in memory, so none of them is retried.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// The input source could not be opened or read.
    #[error("Unable to read {}: {source}", path.display())]
    Io {
        /// Path of the source that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The data does not match the declared schema.
    #[error("Data format error: {0}")]
    DataFormat(String),

    /// A `date`/`time` field is missing or cannot be turned into a timestamp.
    #[error("Malformed timestamp{}: {reason}", row.map(|r| format!(" at row {r}")).unwrap_or_default())]
    MalformedTimestamp {
        /// Zero-based row of the offending value, when one is known.
        row: Option<usize>,
        /// What was wrong with it.
        reason: String,
    },

    /// A window width is zero, negative, or not an integer.
    #[error("Invalid window width {0:?}: widths must be positive integers")]
    InvalidWindowWidth(String),

    /// A stage needs a column the table does not have.
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// Two aligned series were combined although their indexes differ.
    #[error("Series '{left}' and '{right}' are not aligned on the same index")]
    Misaligned {
        /// Name of the left operand.
        left: String,
        /// Name of the right operand.
        right: String,
    },

    /// A pipeline stage ran before any data was loaded.
    #[error("No price data loaded; call read_data first")]
    NotLoaded,

    /// Pass-through of dataframe errors.
    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Result alias used across the crate.
pub type Result<T, E = FeatureError> = std::result::Result<T, E>;
