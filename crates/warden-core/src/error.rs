//! Error types for collaborator calls.
//!
//! Nothing in here ever reaches a client directly: the policy engine turns
//! every one of these into "no match" or "no verdict" and logs it.

use thiserror::Error;

/// Failure of a rule store or cache backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing store could not be reached or queried.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("corrupt value for {key}: {reason}")]
    Corrupt {
        /// Key or row identifier.
        key: String,
        /// Decoder message.
        reason: String,
    },
}

/// Failure of an external reputation or classification lookup.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    /// The call exceeded its deadline.
    #[error("lookup timed out")]
    Timeout,

    /// Network or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    Status(u16),

    /// Upstream body was not what we expected.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// The provider is not configured (e.g. missing API key).
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LookupError::Timeout
        } else if let Some(status) = err.status() {
            LookupError::Status(status.as_u16())
        } else if err.is_decode() {
            LookupError::Decode(err.to_string())
        } else {
            LookupError::Transport(err.to_string())
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for lookups.
pub type LookupResult<T> = std::result::Result<T, LookupError>;
