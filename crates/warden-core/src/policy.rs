//! Policy engine: combines local rules, reputation and categories into a
//! single [`Verdict`].
//!
//! ## Evaluation order
//!
//! Host checks (handshake):
//!
//! 1. Block rules against `https://{host}` (URL prefix, hostname, domain)
//! 2. TLS exclusion list
//! 3. Redirect rules (same scope order)
//! 4. Default allow
//!
//! URL checks (request):
//!
//! 1. Block rules (URL prefix, hostname, domain)
//! 2. Domain reputation
//! 3. Category policy
//! 4. Redirect rules
//! 5. Default allow
//!
//! Block beats redirect, exact scope beats domain scope, local rules beat
//! reputation which beats categories. The first match wins.
//!
//! ## Failure handling
//!
//! Rule store and reputation failures are fail-open: they are logged and
//! read as "no match" so the next stage runs. Request-level fail-closed
//! behaviour lives with the caller, which only sees errors when the engine
//! itself cannot be reached.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::decision::{
    Decision, ErrorKind, Verdict, VerdictSource, MSG_HASH_BLOCKED, MSG_HASH_MALICIOUS, MSG_IOC,
    MSG_MIME_BLOCKED,
};
use crate::error::StoreResult;
use crate::reputation::{NullProvider, ReputationProvider};
use crate::rules::{CategoryAction, RuleScope, RuleStore};
use crate::service::DecisionService;
use crate::urls::{strip_port, validate_host, UrlSubjects};

/// How a `host` field was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostField<'a> {
    /// A single string.
    Single(&'a str),
    /// A JSON array.
    Many,
    /// Any other JSON type.
    Other,
}

impl<'a> HostField<'a> {
    /// Classifies a JSON value.
    pub fn from_value(value: &'a Value) -> Self {
        match value {
            Value::String(host) => HostField::Single(host),
            Value::Array(_) => HostField::Many,
            _ => HostField::Other,
        }
    }

    /// Returns the single host or the validation error.
    pub fn single(self) -> Result<&'a str, ErrorKind> {
        match self {
            HostField::Single(host) => Ok(host),
            HostField::Many => Err(ErrorKind::MultipleHostsUnsupported),
            HostField::Other => Err(ErrorKind::InvalidFormat),
        }
    }
}

/// In-process policy engine.
pub struct PolicyEngine {
    store: Arc<dyn RuleStore>,
    reputation: Arc<dyn ReputationProvider>,
}

impl PolicyEngine {
    /// Creates an engine over a rule store and a reputation provider.
    pub fn new(store: Arc<dyn RuleStore>, reputation: Arc<dyn ReputationProvider>) -> Self {
        Self { store, reputation }
    }

    /// Creates an engine with local rules only.
    pub fn local_only(store: Arc<dyn RuleStore>) -> Self {
        Self::new(store, Arc::new(NullProvider))
    }

    /// Checks a hostname at TLS handshake time.
    pub async fn check_host(&self, host: &str) -> Verdict {
        let host = host.trim();
        if !validate_host(host) {
            return Verdict::invalid(ErrorKind::InvalidFormat);
        }

        let subjects = UrlSubjects::from_url(&format!("https://{host}"));
        if let Some(verdict) = self.match_block(&subjects) {
            return verdict;
        }

        let bare = strip_port(&subjects.hostname);
        if self.fail_open("tls_exclusion", bare, self.store.is_tls_excluded(bare)) {
            return Verdict::new(Decision::ExcludeTls, VerdictSource::TlsExclusion);
        }

        if let Some(verdict) = self.match_redirect(&subjects) {
            return verdict;
        }

        Verdict::allow()
    }

    /// Checks a URL at request time.
    pub async fn check_url(&self, url: &str) -> Verdict {
        if url.trim().is_empty() {
            return Verdict::invalid(ErrorKind::MissingField);
        }

        let subjects = UrlSubjects::from_url(url);
        debug!(url = %subjects.url, host = %subjects.hostname, domain = %subjects.domain, "Checking URL");

        if let Some(verdict) = self.match_block(&subjects) {
            return verdict;
        }

        let bare = subjects.bare_host();
        if !bare.is_empty() {
            if let Some(verdict) = self.match_reputation(bare).await {
                return verdict;
            }
            if let Some(verdict) = self.match_category(bare).await {
                return verdict;
            }
        }

        if let Some(verdict) = self.match_redirect(&subjects) {
            return verdict;
        }

        Verdict::allow()
    }

    /// Checks a body's hex SHA-256.
    pub async fn check_hash(&self, sha256: &str) -> Verdict {
        let sha256 = sha256.trim().to_ascii_lowercase();
        if sha256.is_empty() {
            return Verdict::invalid(ErrorKind::MissingField);
        }

        let descriptor = match self.store.blocked_file(&sha256) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(table = "blocked_files", subject = %sha256, error = %e, "Rule store unavailable, treating as no match");
                None
            }
        };
        if let Some(descriptor) = descriptor {
            debug!(sha256 = %sha256, descriptor = %descriptor, "Hash matched local rule");
            return Verdict::new(Decision::block(MSG_HASH_BLOCKED), VerdictSource::HashRule);
        }

        match self.reputation.check_hash(&sha256).await {
            Ok(Some(details)) => {
                return Verdict::new(
                    Decision::Block {
                        reason: MSG_HASH_MALICIOUS.to_string(),
                        details: Some(details),
                    },
                    VerdictSource::HashReputation,
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(sha256 = %sha256, provider = self.reputation.name(), error = %e, "Hash reputation lookup failed, no verdict");
            }
        }

        Verdict::allow()
    }

    /// Checks a sniffed content type.
    pub async fn check_mime(&self, mime: &str) -> Verdict {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.is_empty() {
            return Verdict::invalid(ErrorKind::MissingField);
        }

        if self.fail_open("blocked_mimetypes", &essence, self.store.is_mime_blocked(&essence)) {
            return Verdict::new(Decision::block(MSG_MIME_BLOCKED), VerdictSource::MimeRule);
        }
        Verdict::allow()
    }

    fn match_block(&self, subjects: &UrlSubjects) -> Option<Verdict> {
        for scope in RuleScope::ORDER {
            let subject = subject_for(subjects, scope);
            if self.fail_open("blocked_urls", subject, self.store.match_blocked(scope, subject)) {
                return Some(Verdict::new(
                    Decision::block(scope.block_message()),
                    VerdictSource::BlockRule(scope),
                ));
            }
        }
        None
    }

    fn match_redirect(&self, subjects: &UrlSubjects) -> Option<Verdict> {
        for scope in RuleScope::ORDER {
            let subject = subject_for(subjects, scope);
            let proxy = match self.store.match_redirect(scope, subject) {
                Ok(proxy) => proxy,
                Err(e) => {
                    warn!(table = "redirect_urls", subject, error = %e, "Rule store unavailable, treating as no match");
                    None
                }
            };
            if let Some(proxy) = proxy {
                return Some(Verdict::new(
                    Decision::Redirect {
                        proxy,
                        reason: scope.redirect_message().to_string(),
                    },
                    VerdictSource::RedirectRule(scope),
                ));
            }
        }
        None
    }

    async fn match_reputation(&self, host: &str) -> Option<Verdict> {
        match self.reputation.check_domain(host).await {
            Ok(Some(verdict)) if !verdict.is_whitelisted() => Some(Verdict::new(
                Decision::Block {
                    reason: MSG_IOC.to_string(),
                    details: Some(verdict.details),
                },
                VerdictSource::Reputation,
            )),
            Ok(_) => None,
            Err(e) => {
                warn!(host, provider = self.reputation.name(), error = %e, "Domain reputation lookup failed, no verdict");
                None
            }
        }
    }

    async fn match_category(&self, host: &str) -> Option<Verdict> {
        let ids = match self.reputation.categorize(host).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(host, provider = self.reputation.name(), error = %e, "Category lookup failed, no verdict");
                return None;
            }
        };

        for id in ids {
            let policy = match self.store.category_policy(id) {
                Ok(policy) => policy,
                Err(e) => {
                    warn!(table = "category_policy", category_id = id, error = %e, "Rule store unavailable, treating as no match");
                    None
                }
            };
            if let Some(policy) = policy.filter(|p| p.action == CategoryAction::Blocked) {
                return Some(Verdict::new(
                    Decision::block(format!("Domain belongs to blocked category: {}", policy.name)),
                    VerdictSource::Category,
                ));
            }
        }
        None
    }

    /// Reads a boolean store answer; errors count as no match.
    fn fail_open(&self, table: &str, subject: &str, result: StoreResult<bool>) -> bool {
        match result {
            Ok(matched) => matched,
            Err(e) => {
                warn!(table, subject, error = %e, "Rule store unavailable, treating as no match");
                false
            }
        }
    }
}

fn subject_for(subjects: &UrlSubjects, scope: RuleScope) -> &str {
    match scope {
        RuleScope::UrlPrefix => &subjects.url,
        RuleScope::Hostname => &subjects.hostname,
        RuleScope::Domain => &subjects.domain,
    }
}

#[async_trait]
impl DecisionService for PolicyEngine {
    async fn check_host(&self, host: &str) -> Verdict {
        PolicyEngine::check_host(self, host).await
    }

    async fn check_url(&self, url: &str) -> Verdict {
        PolicyEngine::check_url(self, url).await
    }

    async fn check_hash(&self, sha256: &str) -> Verdict {
        PolicyEngine::check_hash(self, sha256).await
    }

    async fn check_mime(&self, mime: &str) -> Verdict {
        PolicyEngine::check_mime(self, mime).await
    }
}
