//! API request and response models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::CacheEntry;
use warden_storage::DecisionLogEntry;

/// Request body for POST /checkUrl.
///
/// `host` selects the handshake-time check and wins over `url`.
#[derive(Debug, Default, Deserialize)]
pub struct CheckUrlRequest {
    /// Full request URL.
    #[serde(default)]
    pub url: Option<String>,
    /// SNI hostname. Kept as raw JSON so lists and other types can be
    /// rejected with their own messages.
    #[serde(default)]
    pub host: Option<Value>,
}

/// Request body for POST /checkHash.
#[derive(Debug, Default, Deserialize)]
pub struct CheckHashRequest {
    /// Hex SHA-256 of the body.
    #[serde(default)]
    pub file_hash: Option<String>,
    /// URL the body came from, for the audit trail.
    #[serde(default)]
    pub url: Option<String>,
}

/// Request body for POST /checkMimeType.
#[derive(Debug, Default, Deserialize)]
pub struct CheckMimeRequest {
    /// Sniffed content type.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// URL the body came from, for the audit trail.
    #[serde(default)]
    pub url: Option<String>,
}

/// One row of GET /cache.
#[derive(Debug, Serialize)]
pub struct CacheRow {
    pub key: String,
    pub response: Value,
    pub timestamp: i64,
}

impl From<CacheEntry> for CacheRow {
    fn from(entry: CacheEntry) -> Self {
        Self {
            key: entry.key,
            response: entry.value,
            timestamp: entry.fetched_at,
        }
    }
}

/// Response body for GET /cache.
#[derive(Debug, Serialize)]
pub struct CacheResponse {
    pub status: &'static str,
    pub cache: Vec<CacheRow>,
}

/// Query parameters for GET /logs.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Maximum number of entries to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Response body for GET /logs.
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub status: &'static str,
    pub logs: Vec<DecisionLogEntry>,
    pub total: i64,
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
