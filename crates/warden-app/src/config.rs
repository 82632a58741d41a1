//! `warden.toml` configuration.
//!
//! Every section is optional. A missing file yields the defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;
use warden_core::{InspectorConfig, OtxConfig, DEFAULT_TTL};
use warden_proxy::FlowRules;
use warden_server::AuthConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub inspector: InspectorConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub reputation: ReputationSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub flow: FlowRules,
    /// SQLite file; the platform data directory when unset.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

/// `[server]`: the Decision API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Decision log entries older than this are pruned at startup.
    #[serde(default = "default_log_retention")]
    pub log_retention_days: u32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_api_port(),
            enabled: default_true(),
            log_retention_days: default_log_retention(),
        }
    }
}

/// `[proxy]`: the intercepting proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where the root CA lives; the platform data directory when unset.
    #[serde(default)]
    pub ca_dir: Option<PathBuf>,
    /// Remote Decision API base URL. Unset means the in-process engine.
    #[serde(default)]
    pub decision_api: Option<String>,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_proxy_port(),
            enabled: default_true(),
            ca_dir: None,
            decision_api: None,
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL.as_secs(),
        }
    }
}

/// `[reputation]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationSection {
    pub otx_api_key: Option<String>,
    pub timeout_secs: u64,
    pub category_lookup: bool,
    pub otx_base_url: Option<String>,
    pub category_base_url: Option<String>,
}

impl Default for ReputationSection {
    fn default() -> Self {
        let otx = OtxConfig::default();
        Self {
            otx_api_key: None,
            timeout_secs: otx.timeout.as_secs(),
            category_lookup: otx.category_lookup,
            otx_base_url: None,
            category_base_url: None,
        }
    }
}

/// `[auth]`: bearer tokens on the Decision API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// HS256 secret. Unset leaves the API open.
    pub jwt_secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub required_role: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    warden_server::DEFAULT_PORT
}

fn default_proxy_port() -> u16 {
    warden_proxy::DEFAULT_PROXY_PORT
}

fn default_true() -> bool {
    true
}

fn default_log_retention() -> u32 {
    30
}

impl Config {
    /// Parses a TOML document.
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let mut config: Config = toml::from_str(contents).context("invalid configuration")?;
        config.flow = config.flow.normalized();
        Ok(config)
    }

    /// Reputation cache lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Timeout for every outbound lookup and decision call.
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.reputation.timeout_secs.max(1))
    }

    /// Threat feed settings.
    pub fn otx_config(&self) -> OtxConfig {
        let defaults = OtxConfig::default();
        OtxConfig {
            api_key: self.reputation.otx_api_key.clone().filter(|k| !k.is_empty()),
            base_url: self.reputation.otx_base_url.clone().unwrap_or(defaults.base_url),
            category_base_url: self
                .reputation
                .category_base_url
                .clone()
                .unwrap_or(defaults.category_base_url),
            category_lookup: self.reputation.category_lookup,
            timeout: self.lookup_timeout(),
        }
    }

    /// Token settings, or `None` when no secret is configured.
    pub fn auth_config(&self) -> Option<AuthConfig> {
        let secret = self.auth.jwt_secret.clone().filter(|s| !s.is_empty())?;
        Some(AuthConfig {
            jwt_secret: secret,
            issuer: self.auth.issuer.clone(),
            audience: self.auth.audience.clone(),
            required_role: self.auth.required_role.clone(),
        })
    }

    /// Decision API listen address.
    pub fn api_addr(&self) -> anyhow::Result<SocketAddr> {
        parse_addr(&self.server.host, self.server.port)
    }

    /// Proxy listen address.
    pub fn proxy_addr(&self) -> anyhow::Result<SocketAddr> {
        parse_addr(&self.proxy.host, self.proxy.port)
    }
}

fn parse_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))
}

/// Loads configuration from a TOML file.
///
/// A missing file is not an error: the defaults are returned and a warning
/// is logged.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(path = %path.display(), "Configuration file not found, using defaults");
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    Config::from_toml(&contents).with_context(|| format!("failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_document_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.proxy.port, 8080);
        assert_eq!(config.inspector.pending_delay, 2);
        assert_eq!(config.inspector.window_size, 8192);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.lookup_timeout(), Duration::from_secs(5));
        assert!(config.auth_config().is_none());
        assert!(config.server.enabled && config.proxy.enabled);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            database = "/var/lib/warden/warden.db"

            [server]
            port = 5050

            [proxy]
            host = "0.0.0.0"
            decision_api = "https://decisions.example:5000"

            [inspector]
            pending_delay = 4

            [cache]
            ttl_secs = 60

            [auth]
            jwt_secret = "s3cret"
            required_role = "filter"

            [flow]
            bypass_hosts = ["login.example.com"]
            "#,
        )
        .unwrap();

        assert_eq!(config.api_addr().unwrap().port(), 5050);
        assert_eq!(config.proxy_addr().unwrap().to_string(), "0.0.0.0:8080");
        assert_eq!(config.proxy.decision_api.as_deref(), Some("https://decisions.example:5000"));
        assert_eq!(config.inspector.pending_delay, 4);
        assert_eq!(config.inspector.window_size, 8192);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.database, Some(PathBuf::from("/var/lib/warden/warden.db")));

        let auth = config.auth_config().unwrap();
        assert_eq!(auth.jwt_secret, "s3cret");
        assert_eq!(auth.required_role.as_deref(), Some("filter"));

        assert_eq!(config.flow.bypass_hosts, vec!["login.example.com".to_string()]);
        assert!(config.flow.is_token_endpoint("https://idp.example/oauth/token"));
    }

    #[test]
    fn configured_token_endpoints_are_bypassed_and_excluded() {
        let config =
            Config::from_toml("[flow]\ntoken_endpoints = [\"https://login.example.com/v2/authorize\"]").unwrap();
        assert!(config.flow.is_bypassed("login.example.com"));
        assert!(config.flow.is_stream_excluded("https://login.example.com/v2/authorize"));
        assert!(config.flow.is_token_endpoint("https://login.example.com/v2/authorize"));
    }

    #[test]
    fn empty_secret_disables_auth() {
        let config = Config::from_toml("[auth]\njwt_secret = \"\"").unwrap();
        assert!(config.auth_config().is_none());
    }

    #[test]
    fn otx_settings_fall_back_to_defaults() {
        let config = Config::from_toml("[reputation]\notx_api_key = \"key\"\ncategory_lookup = false").unwrap();
        let otx = config.otx_config();
        assert_eq!(otx.api_key.as_deref(), Some("key"));
        assert!(!otx.category_lookup);
        assert_eq!(otx.base_url, OtxConfig::default().base_url);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = load(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("warden.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(load(&path).is_err());
    }
}
