//! Flow controller: applies policy decisions at the four interception hooks.
//!
//! | Hook | Check | Outcome |
//! |------|-------|---------|
//! | handshake | host | `exclude-tls` tunnels the connection undecrypted |
//! | request | URL | allow, 403, relay through a proxy, or 500 |
//! | response headers | - | installs the streaming inspector |
//! | response | - | captures bearer tokens from token endpoints |
//!
//! Failures are asymmetric. A handshake check that cannot be answered
//! still intercepts, so the request check gets its turn. A request check
//! that cannot be answered is refused with 500.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hudsucker::hyper::header::{self, HeaderValue};
use hudsucker::hyper::{Method, Request, Response, StatusCode};
use hudsucker::{Body, RequestOrResponse};
use tracing::{debug, info, warn};
use warden_core::{
    AuditRecord, AuditSink, CheckKind, ContentInspector, Decision, DecisionService, InspectorConfig,
    TracingAuditSink, Verdict,
};

use crate::flow::{next_flow_id, FlowRules};
use crate::relay::UpstreamRelay;
use crate::stream::inspect_body;
use crate::token::{extract_token, TokenSink, TokenStore};

/// What to do with a TLS connection after the handshake check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Decrypt and continue to the request hook.
    Intercept,
    /// Tunnel the connection untouched.
    Passthrough,
}

/// Request facts kept for the response hooks.
#[derive(Debug, Clone)]
pub struct FlowInfo {
    /// Absolute request URL.
    pub url: String,
    pub method: Method,
    /// Downstream client.
    pub client: Option<SocketAddr>,
}

impl FlowInfo {
    /// Captures the facts of a request.
    pub fn from_request(req: &Request<Body>, client: Option<SocketAddr>) -> Self {
        Self {
            url: request_url(req),
            method: req.method().clone(),
            client,
        }
    }
}

/// Drives one proxy's flows through the policy pipeline.
pub struct FlowController {
    decisions: Arc<dyn DecisionService>,
    inspector: Arc<ContentInspector>,
    rules: FlowRules,
    tokens: Arc<dyn TokenSink>,
    audit: Arc<dyn AuditSink>,
    relay: UpstreamRelay,
}

impl std::fmt::Debug for FlowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowController")
            .field("inspector", self.inspector.config())
            .field("rules", &self.rules)
            .finish()
    }
}

impl FlowController {
    /// Creates a controller that asks `decisions` for every verdict.
    pub fn new(decisions: Arc<dyn DecisionService>, inspector: InspectorConfig) -> Self {
        Self {
            inspector: Arc::new(ContentInspector::new(decisions.clone(), inspector)),
            decisions,
            rules: FlowRules::default(),
            tokens: Arc::new(TokenStore::new()),
            audit: Arc::new(TracingAuditSink),
            relay: UpstreamRelay::new(),
        }
    }

    /// Sets the bypass and exclusion rules.
    pub fn with_rules(mut self, rules: FlowRules) -> Self {
        self.rules = rules.normalized();
        self
    }

    /// Sets where captured tokens go.
    pub fn with_token_sink(mut self, tokens: Arc<dyn TokenSink>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Sets where decisions are audited.
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn rules(&self) -> &FlowRules {
        &self.rules
    }

    /// Handshake hook. `sni` is the hostname the client is connecting to.
    pub async fn on_handshake(&self, sni: &str, client: Option<SocketAddr>) -> HandshakeAction {
        if sni.is_empty() || self.rules.is_bypassed(sni) {
            return HandshakeAction::Intercept;
        }

        let started = Instant::now();
        let verdict = self.decisions.check_host(sni).await;
        self.record(CheckKind::Host, sni, &verdict, started, client);

        match verdict.decision {
            Decision::ExcludeTls => {
                info!(host = %sni, "Host excluded from interception");
                HandshakeAction::Passthrough
            }
            Decision::Error { kind } => {
                warn!(host = %sni, error = kind.message(), "Handshake check failed, intercepting anyway");
                HandshakeAction::Intercept
            }
            _ => HandshakeAction::Intercept,
        }
    }

    /// Request hook.
    pub async fn on_request(&self, req: Request<Body>, client: Option<SocketAddr>) -> RequestOrResponse {
        if req.method() == Method::CONNECT {
            return RequestOrResponse::Request(req);
        }
        let url = request_url(&req);
        if self.rules.is_request_bypassed(&url) {
            return RequestOrResponse::Request(req);
        }

        let started = Instant::now();
        let verdict = self.decisions.check_url(&url).await;
        self.record(CheckKind::Url, &url, &verdict, started, client);

        match verdict.decision {
            Decision::Allow => RequestOrResponse::Request(req),
            Decision::Block { reason, .. } => {
                info!(url = %url, reason = %reason, "Request blocked");
                RequestOrResponse::Response(text_response(StatusCode::FORBIDDEN, reason))
            }
            Decision::Redirect { proxy, .. } => {
                // The interception host skips its response hook for
                // responses made here, so both hooks run on the relayed one.
                let flow = FlowInfo::from_request(&req, client);
                match self.relay.send(req, &url, &proxy).await {
                    Ok(res) => {
                        info!(url = %url, proxy = %proxy, status = res.status().as_u16(), "Request relayed");
                        let res = self.on_response_headers(&flow, res);
                        RequestOrResponse::Response(self.on_response(&flow, res).await)
                    }
                    Err(e) => {
                        warn!(url = %url, proxy = %proxy, error = %e, "Cannot relay request");
                        RequestOrResponse::Response(proxy_error())
                    }
                }
            }
            Decision::Error { kind } => {
                warn!(url = %url, error = kind.message(), "Request check failed, refusing");
                RequestOrResponse::Response(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    kind.message(),
                ))
            }
            Decision::ExcludeTls => {
                warn!(url = %url, "Unexpected exclude-tls for a request");
                RequestOrResponse::Response(proxy_error())
            }
        }
    }

    /// Response-headers hook. Wraps the body in the streaming inspector.
    pub fn on_response_headers(&self, flow: &FlowInfo, res: Response<Body>) -> Response<Body> {
        if !has_body(&flow.method, res.status()) || self.rules.is_stream_excluded(&flow.url) {
            return res;
        }

        let flow_id = next_flow_id();
        debug!(flow_id, url = %flow.url, status = res.status().as_u16(), "Inspecting response body");

        let (mut parts, body) = res.into_parts();
        parts.headers.remove(header::CONTENT_LENGTH);
        parts
            .headers
            .insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let state = self.inspector.start(flow_id, flow.url.clone());
        Response::from_parts(parts, inspect_body(self.inspector.clone(), state, body))
    }

    /// Response hook. Reads bearer tokens from token endpoints.
    pub async fn on_response(&self, flow: &FlowInfo, res: Response<Body>) -> Response<Body> {
        if !self.rules.is_token_endpoint(&flow.url) {
            return res;
        }

        let (parts, body) = res.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(url = %flow.url, error = %e, "Failed to read token response");
                return text_response(StatusCode::BAD_GATEWAY, "Bad gateway");
            }
        };

        match extract_token(&bytes) {
            Some(token) => {
                info!(url = %flow.url, "Captured bearer token");
                self.tokens.store(token);
            }
            None => debug!(url = %flow.url, "Token endpoint response without token"),
        }
        Response::from_parts(parts, Body::from(Full::new(bytes)))
    }

    fn record(
        &self,
        check: CheckKind,
        subject: &str,
        verdict: &Verdict,
        started: Instant,
        client: Option<SocketAddr>,
    ) {
        let mut record = AuditRecord::new(check, subject, verdict, started.elapsed());
        if let Some(client) = client {
            record = record.with_client(client.to_string());
        }
        self.audit.record(&record);
    }
}

/// Absolute URL of a proxied request. Origin-form requests are completed
/// from the `Host` header.
///
/// Intercepted requests carry the CONNECT authority, so the scheme's default
/// port is left out to match what the client typed.
pub fn request_url(req: &Request<Body>) -> String {
    let uri = req.uri();
    if let Some(authority) = uri.authority() {
        let scheme = uri.scheme_str().unwrap_or("http");
        let default_port = match scheme {
            "https" => Some(443),
            "http" => Some(80),
            _ => None,
        };
        if authority.port_u16().is_none() || authority.port_u16() != default_port {
            return uri.to_string();
        }
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        return format!("{scheme}://{}{path}", authority.host());
    }
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("http://{host}{path}")
}

fn has_body(method: &Method, status: StatusCode) -> bool {
    !(method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

fn text_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    let mut res = Response::new(Body::from(Full::new(Bytes::from(message.into()))));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}

fn proxy_error() -> Response<Body> {
    text_response(StatusCode::INTERNAL_SERVER_ERROR, "Proxy error")
}
