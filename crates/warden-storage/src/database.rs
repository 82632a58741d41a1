//! High-level database interface.

use std::path::PathBuf;

use directories::ProjectDirs;
use tracing::{info, warn};
use warden_core::{
    AuditRecord, AuditSink, CacheBackend, CacheEntry, CategoryPolicy, RuleScope, RuleStore,
    StoreResult,
};

use crate::error::{Result, StorageError};
use crate::models::{DecisionLogEntry, RedirectRule, UrlRule};
use crate::pool::ConnectionPool;
use crate::repository::{
    BlockedFilesRepo, BlockedMimeRepo, BlockedUrlsRepo, CacheRepo, CategoryRepo, DecisionLogRepo,
    RedirectUrlsRepo, TlsExclusionRepo,
};

/// High-level database interface for Warden.
///
/// Implements [`RuleStore`], [`CacheBackend`] and [`AuditSink`] so the
/// engine, the reputation cache and the audit pipeline can share one file.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Create a new database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Create a new database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "warden", "warden")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("warden.db"))
    }

    /// Seed the default category policy. Existing rows are kept.
    pub fn seed_defaults(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let added = CategoryRepo::seed_defaults(&conn)?;
        if added > 0 {
            info!(added, "Seeded default category policy");
        }
        Ok(added)
    }

    // === URL rules ===

    /// Add a block rule.
    pub fn add_block_rule(&self, scope: RuleScope, value: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        BlockedUrlsRepo::insert(&conn, scope, value)
    }

    /// List block rules.
    pub fn block_rules(&self) -> Result<Vec<UrlRule>> {
        let conn = self.pool.get()?;
        BlockedUrlsRepo::list(&conn)
    }

    /// Add or replace a redirect rule.
    pub fn set_redirect_rule(&self, scope: RuleScope, value: &str, proxy: &str) -> Result<()> {
        let conn = self.pool.get()?;
        RedirectUrlsRepo::upsert(&conn, scope, value, proxy)
    }

    /// List redirect rules.
    pub fn redirect_rules(&self) -> Result<Vec<RedirectRule>> {
        let conn = self.pool.get()?;
        RedirectUrlsRepo::list(&conn)
    }

    // === Hosts and content ===

    /// Exclude a host from TLS interception.
    pub fn add_tls_exclusion(&self, hostname: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        TlsExclusionRepo::insert(&conn, hostname)
    }

    /// Block a file hash.
    pub fn add_blocked_file(&self, sha256: &str, descriptor: &str) -> Result<()> {
        let conn = self.pool.get()?;
        BlockedFilesRepo::upsert(&conn, sha256, descriptor)
    }

    /// Block a MIME type.
    pub fn add_blocked_mime(&self, mime: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        BlockedMimeRepo::insert(&conn, mime)
    }

    // === Cache ===

    /// Delete cache rows fetched before the cutoff (unix seconds).
    pub fn purge_cache(&self, cutoff: i64) -> Result<usize> {
        let conn = self.pool.get()?;
        CacheRepo::purge_older_than(&conn, cutoff)
    }

    // === Decision log ===

    /// Persist a decision.
    pub fn log_decision(&self, record: &AuditRecord) -> Result<i64> {
        let conn = self.pool.get()?;
        DecisionLogRepo::insert(&conn, record)
    }

    /// Most recent decisions first.
    pub fn recent_decisions(&self, limit: usize, offset: usize) -> Result<Vec<DecisionLogEntry>> {
        let conn = self.pool.get()?;
        DecisionLogRepo::recent(&conn, limit, offset)
    }

    /// Number of logged decisions.
    pub fn count_decisions(&self) -> Result<i64> {
        let conn = self.pool.get()?;
        DecisionLogRepo::count(&conn)
    }

    /// Delete decisions older than the retention period.
    pub fn prune_decisions(&self, retention_days: u32) -> Result<usize> {
        let conn = self.pool.get()?;
        DecisionLogRepo::prune(&conn, retention_days)
    }
}

impl RuleStore for Database {
    fn match_blocked(&self, scope: RuleScope, subject: &str) -> StoreResult<bool> {
        let conn = self.pool.get()?;
        Ok(BlockedUrlsRepo::matches(&conn, scope, subject)?)
    }

    fn match_redirect(&self, scope: RuleScope, subject: &str) -> StoreResult<Option<String>> {
        let conn = self.pool.get()?;
        Ok(RedirectUrlsRepo::find(&conn, scope, subject)?)
    }

    fn is_tls_excluded(&self, hostname: &str) -> StoreResult<bool> {
        let conn = self.pool.get()?;
        Ok(TlsExclusionRepo::contains(&conn, hostname)?)
    }

    fn blocked_file(&self, sha256: &str) -> StoreResult<Option<String>> {
        let conn = self.pool.get()?;
        Ok(BlockedFilesRepo::find(&conn, sha256)?)
    }

    fn is_mime_blocked(&self, mime: &str) -> StoreResult<bool> {
        let conn = self.pool.get()?;
        Ok(BlockedMimeRepo::contains(&conn, mime)?)
    }

    fn category_policy(&self, category_id: u32) -> StoreResult<Option<CategoryPolicy>> {
        let conn = self.pool.get()?;
        Ok(CategoryRepo::get(&conn, category_id)?)
    }
}

impl CacheBackend for Database {
    fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let conn = self.pool.get()?;
        Ok(CacheRepo::get(&conn, key)?)
    }

    fn put(&self, entry: &CacheEntry) -> StoreResult<()> {
        let conn = self.pool.get()?;
        Ok(CacheRepo::put(&conn, entry)?)
    }

    fn all(&self) -> StoreResult<Vec<CacheEntry>> {
        let conn = self.pool.get()?;
        Ok(CacheRepo::all(&conn)?)
    }
}

impl AuditSink for Database {
    fn record(&self, record: &AuditRecord) {
        if let Err(e) = self.log_decision(record) {
            warn!(error = %e, subject = %record.subject, "Failed to persist decision");
        }
    }
}
