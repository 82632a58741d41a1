//! Warden Server - Decision API.
//!
//! ## Endpoints
//!
//! - `POST /checkUrl` - Check a URL (`{url}`) or a handshake hostname (`{host}`)
//! - `POST /checkHash` - Check a body SHA-256 (`{file_hash, url}`)
//! - `POST /checkMimeType` - Check a sniffed content type (`{mime_type, url}`)
//! - `GET /cache` - Dump the reputation cache
//! - `GET /logs` - Recent decisions with pagination
//! - `GET /health` - Liveness check (never authenticated)
//!
//! Everything except `/health` sits behind `[authenticate, authorize]` when
//! a JWT secret is configured.
//!
//! ## Example
//!
//! ```no_run
//! use warden_server::{AppState, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let state = AppState::in_memory().unwrap();
//!     let server = Server::with_state(ServerConfig::default(), state).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod auth;
pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::net::SocketAddr;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use auth::{AuthConfig, Authenticator, Claims};
pub use error::{ApiError, Result};
pub use state::AppState;

/// Default server port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default server host (localhost only for security).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1).
    pub host: String,
    /// Port to bind to (default: 5000).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] warden_storage::StorageError),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    let mut protected = Router::new()
        .route("/checkUrl", post(handlers::check_url))
        .route("/checkHash", post(handlers::check_hash))
        .route("/checkMimeType", post(handlers::check_mime))
        .route("/cache", get(handlers::get_cache))
        .route("/logs", get(handlers::get_logs));

    // Layers run outside-in, so authenticate (added last) runs first.
    match state.auth.clone() {
        Some(auth) => {
            protected = protected
                .route_layer(middleware::from_fn_with_state(auth.clone(), auth::authorize))
                .route_layer(middleware::from_fn_with_state(auth, auth::authenticate));
        }
        None => warn!("No JWT secret configured, decision API is unauthenticated"),
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// The HTTP API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server over prepared application state.
    pub fn with_state(config: ServerConfig, state: AppState) -> std::result::Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self {
            router: router(state),
            addr,
        })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the server until shutdown.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the server until the signal future resolves.
    pub async fn run_until<F>(self, signal: F) -> std::result::Result<(), ServerError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!("Starting Warden decision API on {}", self.addr);

        let domain = if self.addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        // Allow address reuse (helps with TIME_WAIT sockets after restart)
        socket
            .set_reuse_address(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .bind(&self.addr.into())
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .listen(128)
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = tokio::net::TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("Decision API stopped");
        Ok(())
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
