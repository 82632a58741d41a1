//! The decision capability consumed by the proxy and the inspector.

use async_trait::async_trait;
use serde_json::Value;

use crate::decision::Verdict;
use crate::policy::HostField;

/// Anything that can answer the four policy checks.
///
/// Implemented in-process by [`crate::PolicyEngine`] and over HTTP by the
/// proxy's remote client. Implementations never fail: problems surface as
/// [`crate::Decision::Error`].
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Handshake-level check of an SNI hostname (`host[:port]`).
    async fn check_host(&self, host: &str) -> Verdict;

    /// Request-level check of a full URL.
    async fn check_url(&self, url: &str) -> Verdict;

    /// Check of a body's hex SHA-256.
    async fn check_hash(&self, sha256: &str) -> Verdict;

    /// Check of a sniffed content type.
    async fn check_mime(&self, mime: &str) -> Verdict;

    /// Host check for a host supplied as an arbitrary JSON value. Lists
    /// and non-strings are rejected before any lookup.
    async fn check_host_value(&self, value: &Value) -> Verdict {
        match HostField::from_value(value).single() {
            Ok(host) => self.check_host(host).await,
            Err(kind) => Verdict::invalid(kind),
        }
    }
}
