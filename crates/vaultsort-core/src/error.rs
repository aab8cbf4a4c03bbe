//! Error types for vaultsort.

use std::time::Duration;

use thiserror::Error;

use crate::models::TaskStage;

/// Result type alias using vaultsort's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vaultsort operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Provider call failed for a reason worth retrying (timeout, connection, 5xx, 429).
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Provider rejected the request (auth, bad request, unknown model).
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider response held no parsable classification payload.
    #[error("Malformed output: {0}")]
    MalformedOutput(String),

    /// Classification gave up after exhausting its attempts.
    #[error("Classification failed after {attempts} attempt(s): {last_error}")]
    ClassificationFailed { attempts: u32, last_error: String },

    /// Wall-clock budget elapsed before the operation returned.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A persisted ledger, cache, or progress file could not be decoded.
    #[error("Ledger corruption: {0}")]
    LedgerCorruption(String),

    /// Task stage machine was asked to move backward or skip a stage.
    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: TaskStage, to: TaskStage },

    /// A note was edited on disk after it was read for classification.
    #[error("Note changed since it was scanned: {0}")]
    NoteChanged(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the classifier should retry the call that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Timeout(_))
    }

    /// Whether this error came from an elapsed wall-clock budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::Transient(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
