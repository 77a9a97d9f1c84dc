//! Error types for setup handling

use std::path::PathBuf;
use thiserror::Error;

use crate::convert::ConvertError;

/// A setup document was rejected. State is never changed when this is returned.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{0}")]
    Malformed(String),

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error(transparent)]
    Conversion(#[from] ConvertError),
}

/// Errors from the setup store
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("setup file {path} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("setup worker failed: {0}")]
    Worker(String),
}
