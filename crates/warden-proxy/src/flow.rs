//! Static flow rules: which hosts skip decisions and which URLs skip body
//! inspection.

use std::sync::atomic::{AtomicU64, Ordering};

use hyper::Uri;
use serde::{Deserialize, Serialize};
use warden_core::urls::strip_port;

static NEXT_FLOW_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-wide unique flow identifier.
pub fn next_flow_id() -> u64 {
    NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed)
}

/// Paths of the usual token-issuance endpoints.
pub const DEFAULT_TOKEN_ENDPOINTS: &[&str] = &["/oauth/token", "/token"];

/// Hosts and URLs handled outside the policy pipeline.
///
/// URL entries starting with `/` match a request path exactly; any other
/// entry is a literal URL prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowRules {
    /// Hosts whose flows never trigger a decision call. A leading `.`
    /// also covers subdomains.
    pub bypass_hosts: Vec<String>,
    /// URLs whose response bodies are not inspected.
    pub stream_exclusions: Vec<String>,
    /// URLs whose JSON responses carry a bearer token.
    pub token_endpoints: Vec<String>,
}

impl Default for FlowRules {
    fn default() -> Self {
        let endpoints: Vec<String> = DEFAULT_TOKEN_ENDPOINTS.iter().map(|s| s.to_string()).collect();
        Self {
            bypass_hosts: Vec::new(),
            stream_exclusions: endpoints.clone(),
            token_endpoints: endpoints,
        }
    }
}

impl FlowRules {
    /// Adds a bypass host.
    pub fn with_bypass_host(mut self, host: impl Into<String>) -> Self {
        self.bypass_hosts.push(host.into().to_ascii_lowercase());
        self
    }

    /// Adds a URL whose body is streamed through untouched.
    pub fn with_stream_exclusion(mut self, url: impl Into<String>) -> Self {
        self.stream_exclusions.push(url.into());
        self
    }

    /// Adds a token-issuance URL. Token endpoints are also excluded from
    /// body inspection and their hosts bypass decisions.
    pub fn with_token_endpoint(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.register_token_endpoint(&url);
        if !self.token_endpoints.contains(&url) {
            self.token_endpoints.push(url);
        }
        self
    }

    /// Applies the token endpoint side effects to every listed endpoint.
    ///
    /// Rules read from a configuration file carry bare endpoint lists; this
    /// adds their hosts to the bypass set and their URLs to the stream
    /// exclusions. Idempotent.
    pub fn normalized(mut self) -> Self {
        for url in self.token_endpoints.clone() {
            self.register_token_endpoint(&url);
        }
        self
    }

    fn register_token_endpoint(&mut self, url: &str) {
        if let Some(host) = url_host(url) {
            if !self.bypass_hosts.contains(&host) {
                self.bypass_hosts.push(host);
            }
        }
        if !self.stream_exclusions.iter().any(|entry| entry == url) {
            self.stream_exclusions.push(url.to_string());
        }
    }

    /// Whether `host` (`host[:port]`) bypasses decisions.
    pub fn is_bypassed(&self, host: &str) -> bool {
        let host = strip_port(host.trim()).trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }
        self.bypass_hosts.iter().any(|entry| {
            let entry = entry.to_ascii_lowercase();
            match entry.strip_prefix('.') {
                Some(suffix) => host == suffix || host.ends_with(&entry),
                None => host == entry,
            }
        })
    }

    /// Whether a request to `url` skips the decision call: its host is
    /// bypassed or it is a token endpoint.
    pub fn is_request_bypassed(&self, url: &str) -> bool {
        if self.is_token_endpoint(url) {
            return true;
        }
        url.parse::<Uri>()
            .ok()
            .and_then(|uri| uri.host().map(|host| self.is_bypassed(host)))
            .unwrap_or(false)
    }

    /// Whether the response body of `url` skips inspection.
    pub fn is_stream_excluded(&self, url: &str) -> bool {
        matches_any(&self.stream_exclusions, url)
    }

    /// Whether `url` issues bearer tokens.
    pub fn is_token_endpoint(&self, url: &str) -> bool {
        matches_any(&self.token_endpoints, url)
    }
}

fn matches_any(entries: &[String], url: &str) -> bool {
    let path = url.parse::<Uri>().ok().map(|uri| uri.path().to_string());
    entries.iter().any(|entry| {
        if entry.starts_with('/') {
            path.as_deref() == Some(entry.as_str())
        } else {
            url.starts_with(entry.as_str())
        }
    })
}

fn url_host(url: &str) -> Option<String> {
    let uri = url.parse::<Uri>().ok()?;
    uri.host().map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_ids_are_unique() {
        let a = next_flow_id();
        let b = next_flow_id();
        assert_ne!(a, b);
    }

    #[test]
    fn defaults_cover_token_paths() {
        let rules = FlowRules::default();
        assert!(rules.bypass_hosts.is_empty());
        assert!(rules.is_stream_excluded("https://idp.example.com/oauth/token"));
        assert!(rules.is_token_endpoint("https://api.example.com/token"));
        assert!(!rules.is_token_endpoint("https://api.example.com/token/refresh"));
        assert!(!rules.is_stream_excluded("https://www.example.com/download.zip"));
    }

    #[test]
    fn bypass_matches_exact_host_ignoring_port_and_case() {
        let rules = FlowRules::default().with_bypass_host("Auth.Example.com");
        assert!(rules.is_bypassed("auth.example.com"));
        assert!(rules.is_bypassed("AUTH.example.com:443"));
        assert!(!rules.is_bypassed("www.auth.example.com"));
        assert!(!rules.is_bypassed(""));
    }

    #[test]
    fn leading_dot_covers_subdomains() {
        let rules = FlowRules::default().with_bypass_host(".corp.example");
        assert!(rules.is_bypassed("corp.example"));
        assert!(rules.is_bypassed("sso.corp.example"));
        assert!(!rules.is_bypassed("notcorp.example"));
    }

    #[test]
    fn token_endpoint_url_registers_everywhere() {
        let rules = FlowRules {
            bypass_hosts: Vec::new(),
            stream_exclusions: Vec::new(),
            token_endpoints: Vec::new(),
        }
        .with_token_endpoint("https://login.example.com/v2/authorize");

        assert!(rules.is_bypassed("login.example.com"));
        assert!(rules.is_token_endpoint("https://login.example.com/v2/authorize?grant=1"));
        assert!(rules.is_stream_excluded("https://login.example.com/v2/authorize"));
        assert!(!rules.is_token_endpoint("https://login.example.com/v2/other"));
    }

    #[test]
    fn normalizing_registers_deserialized_endpoints() {
        let rules: FlowRules = serde_json::from_str(
            r#"{"token_endpoints": ["https://login.example.com/v2/authorize", "/oauth/token"]}"#,
        )
        .unwrap();
        assert!(!rules.is_bypassed("login.example.com"));

        let rules = rules.normalized();
        assert!(rules.is_bypassed("login.example.com"));
        assert!(rules.is_stream_excluded("https://login.example.com/v2/authorize"));
        assert!(rules.is_stream_excluded("https://idp.example/oauth/token"));
        assert_eq!(rules.clone().normalized(), rules);
    }

    #[test]
    fn token_requests_bypass_decisions() {
        let rules = FlowRules::default().with_bypass_host("sso.example");
        assert!(rules.is_request_bypassed("https://idp.example/oauth/token"));
        assert!(rules.is_request_bypassed("https://sso.example/login"));
        assert!(!rules.is_request_bypassed("https://idp.example/oauth/authorize"));
        assert!(!rules.is_request_bypassed("not a url"));
    }

    #[test]
    fn rules_deserialize_with_defaults() {
        let rules: FlowRules = serde_json::from_str(r#"{"bypass_hosts": ["a.example"]}"#).unwrap();
        assert_eq!(rules.bypass_hosts, vec!["a.example".to_string()]);
        assert_eq!(rules.token_endpoints, FlowRules::default().token_endpoints);
    }
}
