//! Reputation providers: domain and file-hash threat verdicts plus content
//! category classification.
//!
//! [`ReputationProvider`] is the only thing the policy engine sees. Two
//! implementations ship here:
//!
//! - [`OtxProvider`]: AlienVault OTX indicators for domains and file hashes,
//!   and the OpenDNS domain tagging page for categories. Every upstream
//!   response is memoized in a [`ReputationCache`] under its request URL.
//! - [`NullProvider`]: never has a verdict.
//!
//! Providers return [`LookupResult`]; the engine decides what an error means.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cache::ReputationCache;
use crate::error::{LookupError, LookupResult};

/// Default OTX API base.
pub const DEFAULT_OTX_BASE_URL: &str = "https://otx.alienvault.com";
/// Default category lookup base.
pub const DEFAULT_CATEGORY_BASE_URL: &str = "https://domain.opendns.com";
/// Default timeout for every external call.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

static CATEGORY_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)id="catname-(\d+)".*?</td>\s*<td[^>]*>(.*?)</td>"#)
        .expect("category pattern is valid")
});

/// Threat verdict for a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainVerdict {
    /// Feed verdict, e.g. `Malicious`, `Unknown` or `Whitelisted`.
    pub verdict: String,
    /// Supporting facts (addresses, ASNs, nameservers, certificates).
    pub details: Value,
}

impl DomainVerdict {
    /// Returns true if the feed explicitly vouches for the domain.
    pub fn is_whitelisted(&self) -> bool {
        self.verdict.eq_ignore_ascii_case("whitelisted")
    }
}

/// Capability interface for external reputation data.
#[async_trait]
pub trait ReputationProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Threat verdict for a bare hostname, `None` when the feed has nothing.
    async fn check_domain(&self, host: &str) -> LookupResult<Option<DomainVerdict>>;

    /// Threat details for a SHA-256, `None` when the hash is not flagged.
    async fn check_hash(&self, sha256: &str) -> LookupResult<Option<Value>>;

    /// Category identifiers assigned to a bare hostname.
    async fn categorize(&self, host: &str) -> LookupResult<Vec<u32>>;
}

/// Provider with no data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProvider;

#[async_trait]
impl ReputationProvider for NullProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn check_domain(&self, _host: &str) -> LookupResult<Option<DomainVerdict>> {
        Ok(None)
    }

    async fn check_hash(&self, _sha256: &str) -> LookupResult<Option<Value>> {
        Ok(None)
    }

    async fn categorize(&self, _host: &str) -> LookupResult<Vec<u32>> {
        Ok(Vec::new())
    }
}

/// Settings for [`OtxProvider`].
#[derive(Debug, Clone)]
pub struct OtxConfig {
    /// OTX API key. Without one, domain and hash lookups have no verdict.
    pub api_key: Option<String>,
    /// OTX API base URL.
    pub base_url: String,
    /// Category page base URL.
    pub category_base_url: String,
    /// Whether to classify domains at all.
    pub category_lookup: bool,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl Default for OtxConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OTX_BASE_URL.to_string(),
            category_base_url: DEFAULT_CATEGORY_BASE_URL.to_string(),
            category_lookup: true,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

/// OTX threat feed plus OpenDNS category classification.
pub struct OtxProvider {
    client: reqwest::Client,
    config: OtxConfig,
    cache: Arc<ReputationCache>,
}

impl OtxProvider {
    /// Creates a provider. Lookups are memoized in `cache`.
    pub fn new(config: OtxConfig, cache: Arc<ReputationCache>) -> LookupResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("Mozilla/5.0")
            .build()
            .map_err(|e| LookupError::NotConfigured(e.to_string()))?;
        Ok(Self {
            client,
            config,
            cache,
        })
    }

    fn domain_url(&self, host: &str) -> String {
        format!(
            "{}/api/v1/indicators/domain/{}/general",
            self.config.base_url.trim_end_matches('/'),
            host
        )
    }

    fn hash_url(&self, sha256: &str) -> String {
        format!(
            "{}/api/v1/indicators/file/{}/analysis",
            self.config.base_url.trim_end_matches('/'),
            sha256
        )
    }

    fn category_url(&self, host: &str) -> String {
        format!(
            "{}/{}",
            self.config.category_base_url.trim_end_matches('/'),
            host
        )
    }

    async fn fetch_indicator(&self, url: &str, api_key: &str) -> LookupResult<Value> {
        self.cache
            .get_or_fetch(url, || async {
                let response = self
                    .client
                    .get(url)
                    .header("X-OTX-API-KEY", api_key)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok::<_, LookupError>(response.json::<Value>().await?)
            })
            .await
    }
}

#[async_trait]
impl ReputationProvider for OtxProvider {
    fn name(&self) -> &'static str {
        "otx"
    }

    async fn check_domain(&self, host: &str) -> LookupResult<Option<DomainVerdict>> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Ok(None);
        };
        let report = self.fetch_indicator(&self.domain_url(host), api_key).await?;
        let verdict = parse_domain_report(&report);
        if let Some(v) = &verdict {
            info!(host, verdict = %v.verdict, "OTX domain verdict");
        }
        Ok(verdict)
    }

    async fn check_hash(&self, sha256: &str) -> LookupResult<Option<Value>> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Ok(None);
        };
        let report = self.fetch_indicator(&self.hash_url(sha256), api_key).await?;
        Ok(parse_file_report(&report))
    }

    async fn categorize(&self, host: &str) -> LookupResult<Vec<u32>> {
        if !self.config.category_lookup {
            return Ok(Vec::new());
        }
        let url = self.category_url(host);
        let cached = self
            .cache
            .get_or_fetch(&url, || async {
                let page = self
                    .client
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                Ok::<_, LookupError>(json!(parse_category_page(&page)))
            })
            .await?;

        let ids = serde_json::from_value::<Vec<u32>>(cached)
            .map_err(|e| LookupError::Decode(e.to_string()))?;
        debug!(host, ?ids, "Categories");
        Ok(ids)
    }
}

/// Extracts a domain verdict from an OTX `general` report.
///
/// No verdict when the indicator has no pulses or any validation source is
/// the whitelist.
pub fn parse_domain_report(report: &Value) -> Option<DomainVerdict> {
    let pulses = report["pulse_info"]["count"].as_u64().unwrap_or(0);
    if pulses == 0 {
        return None;
    }

    let whitelisted = report["validation"]
        .as_array()
        .is_some_and(|entries| entries.iter().any(|v| v["source"] == "whitelist"));
    if whitelisted {
        return None;
    }

    let facts = &report["facts"];
    let verdict = facts["verdict"].as_str().unwrap_or("Unknown").to_string();
    let list = |field: &str| facts.get(field).cloned().unwrap_or_else(|| json!([]));
    Some(DomainVerdict {
        details: json!({
            "verdict": verdict,
            "ip_addresses": list("current_ip_addresses"),
            "current_asns": list("current_asns"),
            "current_nameservers": list("current_nameservers"),
            "ssl_certificates": list("ssl_certificates"),
        }),
        verdict,
    })
}

/// Extracts threat details from an OTX file `analysis` report.
pub fn parse_file_report(report: &Value) -> Option<Value> {
    let pulse_info = &report["pulse_info"];
    if pulse_info["count"].as_u64().unwrap_or(0) == 0 {
        return None;
    }
    Some(json!({
        "verdict": "Malicious",
        "pulses": pulse_info.get("pulses").cloned().unwrap_or_else(|| json!([])),
    }))
}

/// Extracts approved category ids from an OpenDNS domain tagging page.
pub fn parse_category_page(html: &str) -> Vec<u32> {
    let mut ids = Vec::new();
    for caps in CATEGORY_ROW_RE.captures_iter(html) {
        if !caps[2].contains("Approved") {
            continue;
        }
        if let Ok(id) = caps[1].parse::<u32>() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}
