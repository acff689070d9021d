//! Error types for Gatekeeper.

use thiserror::Error;

use crate::storage::StorageError;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Rejected limiter configuration (non-positive rate or window).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The limiter has been closed.
    #[error("Rate limiter is closed")]
    LimiterClosed,

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored entry could not be decoded.
    #[error("Corrupt state for key '{key}': {source}")]
    CorruptState {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// State encoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
