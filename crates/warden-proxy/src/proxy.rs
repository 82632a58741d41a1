//! MITM proxy server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::ca::CaManager;
use crate::controller::FlowController;
use crate::error::{ProxyError, Result};
use crate::handler::ProxyHandler;
use crate::DEFAULT_PROXY_PORT;

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// Root CA used to sign leaf certificates.
    pub ca_manager: CaManager,
}

impl ProxyConfig {
    /// Creates a configuration on 127.0.0.1 with the CA in the data directory.
    pub fn new() -> Result<Self> {
        let ca_manager = CaManager::with_default_dir()?;
        Ok(Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)),
            ca_manager,
        })
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Sets the CA manager.
    pub fn with_ca_manager(mut self, ca_manager: CaManager) -> Self {
        self.ca_manager = ca_manager;
        self
    }
}

/// Intercepting proxy bound to a [`FlowController`].
pub struct ProxyServer {
    config: ProxyConfig,
    controller: Arc<FlowController>,
}

impl ProxyServer {
    /// Creates a server, generating the CA if it does not exist yet.
    pub fn new(config: ProxyConfig, controller: Arc<FlowController>) -> Result<Self> {
        config.ca_manager.ensure_ca()?;
        Ok(Self { config, controller })
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the CA certificate path for user installation.
    pub fn ca_cert_path(&self) -> PathBuf {
        self.config.ca_manager.cert_path()
    }

    /// Returns the CA certificate as DER bytes.
    pub fn ca_cert_der(&self) -> Result<Vec<u8>> {
        Ok(self.config.ca_manager.read_cert_der()?)
    }

    /// Runs the proxy until it fails.
    pub async fn run(self) -> Result<()> {
        let authority = self.config.ca_manager.ensure_ca()?;
        let handler = ProxyHandler::new(self.controller.clone());

        info!(addr = %self.config.addr, ca = ?self.ca_cert_path(), "Starting MITM proxy");

        Proxy::builder()
            .with_addr(self.config.addr)
            .with_ca(authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(handler)
            .build()
            .map_err(|e| ProxyError::Proxy(e.to_string()))?
            .start()
            .await
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        info!("Proxy server stopped");
        Ok(())
    }

    /// Starts the proxy in the background.
    pub fn start(self) -> Result<ProxyHandle> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let addr = self.config.addr;

        let authority = self.config.ca_manager.ensure_ca()?;
        let handler = ProxyHandler::new(self.controller.clone());
        info!(addr = %addr, ca = ?self.ca_cert_path(), "Starting MITM proxy");

        let handle = tokio::spawn(async move {
            let proxy = match Proxy::builder()
                .with_addr(addr)
                .with_ca(authority)
                .with_rustls_connector(default_provider())
                .with_http_handler(handler)
                .build()
            {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "Failed to build proxy");
                    return;
                }
            };

            tokio::select! {
                result = proxy.start() => {
                    if let Err(e) = result {
                        error!(error = %e, "Proxy error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Proxy shutdown signal received");
                }
            };
        });

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}
