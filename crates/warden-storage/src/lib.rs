//! Warden Storage - SQLite persistence layer.
//!
//! This crate provides database storage for the Warden gateway.
//! It handles:
//!
//! - Rule tables (block, redirect, TLS exclusion, file hash, MIME type, category)
//! - The reputation lookup cache
//! - The decision log
//!
//! [`Database`] implements the `warden-core` contracts ([`warden_core::RuleStore`],
//! [`warden_core::CacheBackend`], [`warden_core::AuditSink`]).
//!
//! # Example
//!
//! ```no_run
//! use warden_core::{RuleScope, RuleStore};
//! use warden_storage::Database;
//!
//! let db = Database::in_memory().unwrap();
//! db.add_block_rule(RuleScope::Domain, "blocked.com").unwrap();
//!
//! assert!(db.match_blocked(RuleScope::Domain, "blocked.com").unwrap());
//! ```

mod database;
pub mod error;
pub mod models;
mod pool;
pub mod repository;
mod schema;

pub use database::Database;
pub use error::{Result, StorageError};
pub use models::{DecisionLogEntry, RedirectRule, UrlRule};
pub use pool::ConnectionPool;
pub use repository::{DEFAULT_BLOCKED_CATEGORIES, DEFAULT_CATEGORIES};
pub use schema::SCHEMA_VERSION;
