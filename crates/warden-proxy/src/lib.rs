//! Warden Proxy - TLS-intercepting proxy that enforces Warden decisions.
//!
//! The [`FlowController`] sits on four hooks of the interception host
//! (hudsucker) and asks a [`warden_core::DecisionService`] what to do:
//!
//! ```text
//! CONNECT ──> on_handshake ── exclude-tls ──> raw tunnel
//!                  │
//!                  ▼
//! request ──> on_request ──┬── allow ──────> upstream
//!                          ├── block ──────> 403 text/plain
//!                          ├── redirect ───> relayed via upstream proxy
//!                          └── error ──────> 500
//!
//! response ─> on_response_headers ─> ContentInspector stream ─> client
//!                  │
//!                  └─> on_response (token endpoints) ─> TokenStore
//! ```
//!
//! The decision service is either the in-process
//! [`warden_core::PolicyEngine`] or a [`RemoteDecisionClient`] talking to a
//! Warden Decision API.

mod ca;
mod client;
mod controller;
mod error;
mod flow;
mod handler;
mod proxy;
mod relay;
mod stream;
mod token;

pub use ca::{CaManager, CaManagerError};
pub use client::{RemoteDecisionClient, DEFAULT_DECISION_TIMEOUT};
pub use controller::{request_url, FlowController, FlowInfo, HandshakeAction};
pub use error::{ProxyError, Result};
pub use flow::{next_flow_id, FlowRules, DEFAULT_TOKEN_ENDPOINTS};
pub use handler::ProxyHandler;
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use relay::UpstreamRelay;
pub use stream::inspect_body;
pub use token::{extract_token, TokenSink, TokenStore};

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8080;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_correct() {
        assert_eq!(DEFAULT_PROXY_PORT, 8080);
    }
}
