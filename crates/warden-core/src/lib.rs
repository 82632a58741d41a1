//! Warden Core - policy decisions and streaming content inspection.
//!
//! This crate holds everything that decides what happens to traffic:
//!
//! - [`PolicyEngine`]: ordered rule matching, reputation and category checks
//! - [`ReputationCache`]: TTL cache with single-flight fetches
//! - [`ReputationProvider`]: threat feed and category capability
//! - [`ContentInspector`]: per-flow body hashing and type sniffing
//!
//! Storage, HTTP and interception live in the other crates and plug in
//! through [`RuleStore`], [`CacheBackend`], [`AuditSink`] and
//! [`DecisionService`].

pub mod audit;
pub mod cache;
pub mod decision;
pub mod error;
pub mod inspector;
pub mod policy;
pub mod reputation;
pub mod rules;
pub mod service;
pub mod sniff;
pub mod urls;

pub use audit::{AuditRecord, AuditSink, FanoutAuditSink, TracingAuditSink};
pub use cache::{CacheBackend, CacheEntry, MemoryCacheBackend, ReputationCache, DEFAULT_TTL};
pub use decision::{CheckKind, Decision, DecisionResponse, ErrorKind, Verdict, VerdictSource};
pub use error::{LookupError, LookupResult, StoreError, StoreResult};
pub use inspector::{ContentInspector, FlowState, InspectorConfig, Phase};
pub use policy::{HostField, PolicyEngine};
pub use reputation::{DomainVerdict, NullProvider, OtxConfig, OtxProvider, ReputationProvider};
pub use rules::{CategoryAction, CategoryPolicy, MemoryRuleStore, RuleScope, RuleStore};
pub use service::DecisionService;
pub use sniff::sniff_mime;
