//! Shared error types used across submodules.

use thiserror::Error;

use crate::circuits::elements::ElementError;
use crate::circuits::parser::ParseError;
use crate::fitting::FitError;

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum EisError {
    /// Wraps element registration and evaluation errors.
    #[error(transparent)]
    Element(#[from] ElementError),
    /// Wraps circuit string parsing errors.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Wraps optimizer errors.
    #[error(transparent)]
    Fit(#[from] FitError),
    /// Raised when measured or requested data is malformed.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// Raised when a model is configured inconsistently.
    #[error("model error: {0}")]
    Model(String),
    /// Raised when a configuration document is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// File system failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV decoding failures.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON (de)serialization failures.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// TOML decoding failures.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience alias for results carrying [`EisError`].
pub type Result<T> = std::result::Result<T, EisError>;
