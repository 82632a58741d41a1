//! Storage error types.

use thiserror::Error;
use warden_core::StoreError;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from rusqlite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (e.g., creating directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value is not one we understand.
    #[error("Invalid value in {table}: {value}")]
    InvalidValue {
        /// Table the value came from.
        table: &'static str,
        /// The offending value.
        value: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Json(e) => StoreError::Corrupt {
                key: "json".to_string(),
                reason: e.to_string(),
            },
            StorageError::InvalidValue { table, value } => StoreError::Corrupt {
                key: table.to_string(),
                reason: format!("unrecognized value {value}"),
            },
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
