//! Warden - traffic-filtering gateway.
//!
//! Runs, over one rule database:
//! - the Decision API (`/checkUrl`, `/checkHash`, `/checkMimeType`)
//! - the TLS-intercepting proxy that enforces those decisions

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use directories::ProjectDirs;
use tokio::sync::broadcast;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warden_app::config::{self, Config};
use warden_core::{
    AuditSink, DecisionService, FanoutAuditSink, NullProvider, OtxProvider, PolicyEngine,
    ReputationCache, ReputationProvider, TracingAuditSink,
};
use warden_proxy::{
    CaManager, FlowController, ProxyConfig, ProxyServer, RemoteDecisionClient, TokenStore,
};
use warden_server::{AppState, Server, ServerConfig};
use warden_storage::Database;

/// Warden - traffic-filtering gateway
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "warden.toml")]
    config: PathBuf,

    /// Database file (overrides the config file)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Decision API port
    #[arg(long)]
    api_port: Option<u16>,

    /// Proxy port
    #[arg(long)]
    proxy_port: Option<u16>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Do not start the proxy
    #[arg(long)]
    no_proxy: bool,

    /// Do not start the Decision API
    #[arg(long)]
    no_api: bool,

    /// OTX API key for domain and file reputation
    #[arg(long, env = "OTX_API_KEY", hide_env_values = true)]
    otx_api_key: Option<String>,

    /// Create the schema, seed the default category policy and exit
    #[arg(long)]
    init_db: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(ref db) = self.db {
            config.database = Some(db.clone());
        }
        if let Some(port) = self.api_port {
            config.server.port = port;
        }
        if let Some(port) = self.proxy_port {
            config.proxy.port = port;
        }
        if self.no_api {
            config.server.enabled = false;
        }
        if self.no_proxy {
            config.proxy.enabled = false;
        }
        if let Some(ref key) = self.otx_api_key {
            config.reputation.otx_api_key = Some(key.clone());
        }
    }
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "warden", "warden").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging to the console plus a daily rotating file.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warden={},warn", log_level)));

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(7)
                .filename_prefix("warden")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stdout))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

fn open_database(config: &Config) -> anyhow::Result<Arc<Database>> {
    let path = match config.database {
        Some(ref path) => path.clone(),
        None => Database::default_db_path()?,
    };
    let db = Database::with_path(&path)?;
    tracing::info!("Database opened at {:?}", path);
    Ok(Arc::new(db))
}

fn reputation(config: &Config, cache: Arc<ReputationCache>) -> anyhow::Result<Arc<dyn ReputationProvider>> {
    let otx = config.otx_config();
    if otx.api_key.is_none() && !otx.category_lookup {
        tracing::info!("Reputation lookups disabled");
        return Ok(Arc::new(NullProvider));
    }
    if otx.api_key.is_none() {
        tracing::warn!("No OTX API key, domain and file reputation disabled");
    }
    Ok(Arc::new(OtxProvider::new(otx, cache)?))
}

/// Builds the proxy's flow controller. With a remote Decision API the
/// proxy captures tokens for it and never intercepts its own calls.
fn flow_controller(
    config: &Config,
    engine: Arc<PolicyEngine>,
    audit: Arc<dyn AuditSink>,
) -> anyhow::Result<FlowController> {
    let tokens = Arc::new(TokenStore::new());
    let mut rules = config.flow.clone();

    let decisions: Arc<dyn DecisionService> = match config.proxy.decision_api {
        Some(ref base_url) => {
            if let Some(host) = reqwest::Url::parse(base_url)?.host_str() {
                rules = rules.with_bypass_host(host);
            }
            tracing::info!("Proxy consults remote Decision API at {}", base_url);
            Arc::new(RemoteDecisionClient::new(
                base_url.as_str(),
                tokens.clone(),
                config.lookup_timeout(),
            )?)
        }
        None => engine,
    };

    Ok(FlowController::new(decisions, config.inspector)
        .with_rules(rules)
        .with_token_sink(tokens)
        .with_audit(audit))
}

async fn shutdown_signal(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep the guard alive for the duration of the program
    let _log_guard = init_logging(&args);

    let mut config = config::load(&args.config)?;
    args.apply(&mut config);

    let db = open_database(&config)?;

    if args.init_db {
        let seeded = db.seed_defaults()?;
        tracing::info!("Database initialized, {} category policies seeded", seeded);
        return Ok(());
    }

    if !config.server.enabled && !config.proxy.enabled {
        anyhow::bail!("both the Decision API and the proxy are disabled");
    }

    tracing::info!("Starting Warden...");

    match db.prune_decisions(config.server.log_retention_days) {
        Ok(0) => {}
        Ok(pruned) => tracing::info!("Pruned {} old decision log entries", pruned),
        Err(e) => tracing::warn!("Failed to prune decision log: {}", e),
    }

    let cache = Arc::new(ReputationCache::new(db.clone(), config.cache_ttl()));
    let engine = Arc::new(PolicyEngine::new(db.clone(), reputation(&config, cache.clone())?));
    let audit: Arc<dyn AuditSink> = Arc::new(
        FanoutAuditSink::new()
            .with(Arc::new(TracingAuditSink))
            .with(db.clone()),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut api_task = None;
    let mut proxy_handle = None;

    if config.server.enabled {
        let mut state = AppState::new(engine.clone(), cache.clone(), db.clone(), audit.clone());
        match config.auth_config() {
            Some(auth) => state = state.with_auth(&auth),
            None => tracing::warn!("No JWT secret configured, Decision API accepts unauthenticated calls"),
        }

        config.api_addr()?;
        let server_config = ServerConfig::default()
            .with_host(config.server.host.clone())
            .with_port(config.server.port);
        let server = Server::with_state(server_config, state)?;
        let signal = shutdown_signal(shutdown_tx.subscribe());

        api_task = Some(tokio::spawn(async move {
            if let Err(e) = server.run_until(signal).await {
                tracing::error!("Decision API error: {}", e);
            }
        }));
    }

    if config.proxy.enabled {
        let ca_manager = match config.proxy.ca_dir {
            Some(ref dir) => CaManager::new(dir),
            None => CaManager::with_default_dir()?,
        };
        let proxy_config = ProxyConfig {
            addr: config.proxy_addr()?,
            ca_manager,
        };
        let controller = flow_controller(&config, engine.clone(), audit.clone())?;
        let proxy = ProxyServer::new(proxy_config, Arc::new(controller))?;
        tracing::info!("Install the CA certificate from {:?} in client trust stores", proxy.ca_cert_path());
        proxy_handle = Some(proxy.start()?);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    let _ = shutdown_tx.send(());
    if let Some(handle) = proxy_handle {
        handle.stop().await;
    }
    if let Some(task) = api_task {
        let _ = task.await;
    }

    tracing::info!("Warden stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_config() {
        let args = Args::parse_from([
            "warden",
            "--db",
            "/tmp/w.db",
            "--api-port",
            "6000",
            "--proxy-port",
            "9090",
            "--no-proxy",
            "--otx-api-key",
            "k",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.database, Some(PathBuf::from("/tmp/w.db")));
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.proxy.port, 9090);
        assert!(!config.proxy.enabled);
        assert!(config.server.enabled);
        assert_eq!(config.reputation.otx_api_key.as_deref(), Some("k"));
    }

    #[test]
    fn remote_decision_api_host_is_bypassed() {
        let mut config = Config::default();
        config.proxy.decision_api = Some("http://decisions.internal:5000".to_string());
        let engine = Arc::new(PolicyEngine::local_only(Arc::new(warden_core::MemoryRuleStore::new())));

        let controller = flow_controller(&config, engine, Arc::new(TracingAuditSink)).unwrap();
        assert!(controller.rules().is_bypassed("decisions.internal"));
        assert!(controller.rules().is_token_endpoint("https://idp.example/oauth/token"));
    }

    #[test]
    fn token_endpoints_from_the_config_file_reach_the_proxy() {
        let mut config =
            Config::from_toml("[flow]\ntoken_endpoints = [\"https://login.example.com/v2/authorize\"]").unwrap();
        config.proxy.decision_api = Some("http://decisions.internal:5000".to_string());
        let engine = Arc::new(PolicyEngine::local_only(Arc::new(warden_core::MemoryRuleStore::new())));

        let controller = flow_controller(&config, engine, Arc::new(TracingAuditSink)).unwrap();
        let rules = controller.rules();
        assert!(rules.is_bypassed("login.example.com"));
        assert!(rules.is_bypassed("decisions.internal"));
        assert!(rules.is_stream_excluded("https://login.example.com/v2/authorize"));
    }
}
