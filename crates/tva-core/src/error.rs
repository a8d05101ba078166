//! Error types for tva-did

use thiserror::Error;

/// tva-did error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Delimited-file parsing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid input shape, configuration or argument
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate or inconsistent period records for a county.
    #[error("Data integrity error (county {county}): {message}")]
    DataIntegrity {
        /// County key the violation was detected on.
        county: String,
        /// What was wrong with the county's rows.
        message: String,
    },

    /// Rank-deficient regression, non-convergent or separated logit fit,
    /// or an empty estimation subsample.
    #[error("Estimation error: {0}")]
    Estimation(String),
}

impl Error {
    /// Shorthand for a [`Error::DataIntegrity`] on `county`.
    pub fn data_integrity(county: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataIntegrity { county: county.into(), message: message.into() }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
