//! Application state for the API server.

use std::sync::Arc;

use warden_core::{
    AuditSink, DecisionService, FanoutAuditSink, PolicyEngine, ReputationCache, TracingAuditSink,
    DEFAULT_TTL,
};
use warden_storage::Database;

use crate::auth::{AuthConfig, Authenticator};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Answers the checks.
    pub decisions: Arc<dyn DecisionService>,
    /// Reputation cache, dumped by `GET /cache`.
    pub cache: Arc<ReputationCache>,
    /// Database backing the decision log.
    pub db: Arc<Database>,
    /// Where decisions are audited.
    pub audit: Arc<dyn AuditSink>,
    /// Token verification; `None` leaves the checks open.
    pub auth: Option<Arc<Authenticator>>,
}

impl AppState {
    /// Creates state from its parts.
    pub fn new(
        decisions: Arc<dyn DecisionService>,
        cache: Arc<ReputationCache>,
        db: Arc<Database>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            decisions,
            cache,
            db,
            audit,
            auth: None,
        }
    }

    /// Requires bearer tokens on the decision routes.
    pub fn with_auth(mut self, config: &AuthConfig) -> Self {
        self.auth = Some(Arc::new(Authenticator::new(config)));
        self
    }

    /// Creates state over an in-memory database with local rules only.
    pub fn in_memory() -> warden_storage::Result<Self> {
        let db = Arc::new(Database::in_memory()?);
        Ok(Self::local(db))
    }

    /// Creates state over a database with local rules only.
    pub fn local(db: Arc<Database>) -> Self {
        let cache = Arc::new(ReputationCache::new(db.clone(), DEFAULT_TTL));
        let engine = Arc::new(PolicyEngine::local_only(db.clone()));
        let audit = FanoutAuditSink::new()
            .with(Arc::new(TracingAuditSink))
            .with(db.clone());

        Self::new(engine, cache, db, Arc::new(audit))
    }
}
