//! Data models for storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::{CheckKind, RuleScope};

/// A block rule row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRule {
    /// Unique identifier.
    pub id: i64,
    /// How the value matches.
    pub scope: RuleScope,
    /// URL prefix, hostname or domain.
    pub value: String,
}

/// A redirect rule row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    /// Unique identifier.
    pub id: i64,
    /// How the value matches.
    pub scope: RuleScope,
    /// URL prefix, hostname or domain.
    pub value: String,
    /// Upstream proxy to route through.
    pub proxy: String,
}

/// A persisted decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    /// Unique identifier.
    pub id: i64,
    /// Which check ran.
    pub check: CheckKind,
    /// URL, host, hash or MIME type.
    pub subject: String,
    /// Wire status.
    pub status: String,
    /// Decision message.
    pub message: String,
    /// Stage that decided.
    pub source: String,
    /// Time spent deciding.
    pub latency_ms: i64,
    /// Caller, if known.
    pub client: Option<String>,
    /// When it was logged.
    pub created_at: DateTime<Utc>,
}

pub(crate) fn check_kind_from_str(s: &str) -> Option<CheckKind> {
    match s {
        "host" => Some(CheckKind::Host),
        "url" => Some(CheckKind::Url),
        "hash" => Some(CheckKind::Hash),
        "mime" => Some(CheckKind::Mime),
        _ => None,
    }
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}
