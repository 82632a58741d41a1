//! Decision API client.
//!
//! Lets the proxy run against a remote Warden server instead of an
//! in-process engine. Transport failures become
//! `Error{UpstreamUnavailable}`, which the flow controller fails open at
//! handshake time and closed at request time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use warden_core::{Decision, DecisionResponse, DecisionService, ErrorKind, Verdict, VerdictSource};

use crate::error::Result;
use crate::token::TokenStore;

/// Timeout for one decision call.
pub const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(5);

/// [`DecisionService`] backed by the HTTP Decision API.
#[derive(Clone)]
pub struct RemoteDecisionClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl std::fmt::Debug for RemoteDecisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDecisionClient")
            .field("base_url", &self.base_url)
            .field("has_token", &self.tokens.get().is_some())
            .finish()
    }
}

impl RemoteDecisionClient {
    /// Creates a client for the API at `base_url`, sending tokens from
    /// `tokens` as bearer credentials.
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenStore>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// Base URL of the API.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(&self, path: &str, body: Value) -> Verdict {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = self.tokens.get() {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Decision API unreachable");
                return Verdict::new(Decision::error(ErrorKind::UpstreamUnavailable), VerdictSource::Remote);
            }
        };

        let status = response.status();
        let decision = match response.json::<DecisionResponse>().await {
            Ok(body) => body.into_decision(),
            Err(e) => {
                warn!(url = %url, status = status.as_u16(), error = %e, "Unreadable decision response");
                Decision::error(ErrorKind::UpstreamUnavailable)
            }
        };
        debug!(url = %url, status = status.as_u16(), decision = decision.status_str(), "Remote decision");
        Verdict::new(decision, VerdictSource::Remote)
    }
}

#[async_trait]
impl DecisionService for RemoteDecisionClient {
    async fn check_host(&self, host: &str) -> Verdict {
        self.call("/checkUrl", json!({ "host": host })).await
    }

    async fn check_url(&self, url: &str) -> Verdict {
        self.call("/checkUrl", json!({ "url": url })).await
    }

    async fn check_hash(&self, sha256: &str) -> Verdict {
        self.call("/checkHash", json!({ "file_hash": sha256 })).await
    }

    async fn check_mime(&self, mime: &str) -> Verdict {
        self.call("/checkMimeType", json!({ "mime_type": mime })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use warden_core::RuleScope;
    use warden_server::{router, AppState, AuthConfig};
    use warden_storage::Database;

    async fn serve(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    fn seeded_db() -> Arc<Database> {
        let db = Arc::new(Database::in_memory().unwrap());
        db.add_block_rule(RuleScope::Domain, "bad.example").unwrap();
        db.set_redirect_rule(RuleScope::Hostname, "www.relay.example", "http://10.0.0.9:3128")
            .unwrap();
        db.add_tls_exclusion("bank.example").unwrap();
        db.add_blocked_file(&"a".repeat(64), "eicar").unwrap();
        db.add_blocked_mime("application/x-dosexec").unwrap();
        db
    }

    fn client(addr: SocketAddr, tokens: Arc<TokenStore>) -> RemoteDecisionClient {
        RemoteDecisionClient::new(format!("http://{addr}/"), tokens, DEFAULT_DECISION_TIMEOUT).unwrap()
    }

    #[tokio::test]
    async fn answers_all_four_checks() {
        let addr = serve(AppState::local(seeded_db())).await;
        let client = client(addr, Arc::new(TokenStore::new()));

        let verdict = client.check_url("https://www.bad.example/x").await;
        assert!(verdict.decision.is_block());
        assert_eq!(verdict.source, VerdictSource::Remote);

        assert_eq!(client.check_host("bank.example").await.decision, Decision::ExcludeTls);
        assert!(client.check_url("https://good.example/").await.decision.is_allow());

        match client.check_url("https://www.relay.example/page").await.decision {
            Decision::Redirect { proxy, .. } => assert_eq!(proxy, "http://10.0.0.9:3128"),
            other => panic!("expected redirect, got {other:?}"),
        }

        assert!(client.check_hash(&"a".repeat(64)).await.decision.is_block());
        assert!(client.check_mime("application/x-dosexec").await.decision.is_block());
        assert!(client.check_mime("text/html").await.decision.is_allow());
    }

    #[tokio::test]
    async fn malformed_host_comes_back_as_error_kind() {
        let addr = serve(AppState::local(seeded_db())).await;
        let client = client(addr, Arc::new(TokenStore::new()));

        assert_eq!(
            client.check_host("not a host").await.decision,
            Decision::error(ErrorKind::InvalidFormat)
        );
    }

    #[tokio::test]
    async fn unreachable_api_is_upstream_unavailable() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(addr, Arc::new(TokenStore::new()));
        assert_eq!(
            client.check_url("https://good.example/").await.decision,
            Decision::error(ErrorKind::UpstreamUnavailable)
        );
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized_and_stored_token_is_sent() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let state = AppState::local(seeded_db()).with_auth(&AuthConfig {
            jwt_secret: "s3cret".to_string(),
            ..AuthConfig::default()
        });
        let addr = serve(state).await;
        let tokens = Arc::new(TokenStore::new());
        let client = client(addr, tokens.clone());

        assert_eq!(
            client.check_url("https://good.example/").await.decision,
            Decision::error(ErrorKind::Unauthorized)
        );

        let exp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 300;
        let token = encode(
            &Header::default(),
            &json!({"sub": "proxy", "exp": exp}),
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        crate::token::TokenSink::store(tokens.as_ref(), token);

        assert!(client.check_url("https://good.example/").await.decision.is_allow());
    }
}
