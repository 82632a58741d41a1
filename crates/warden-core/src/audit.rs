//! Audit records for every decision.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::decision::{CheckKind, Decision, Verdict};

/// One audited decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Which check ran.
    pub check: CheckKind,
    /// The URL, host, hash or MIME type checked.
    pub subject: String,
    /// Wire status (`allowed`, `blocked`, ...).
    pub status: String,
    /// Decision message.
    pub message: String,
    /// Stage that produced the decision.
    pub source: String,
    /// Time spent deciding.
    pub latency_ms: u64,
    /// Who asked (API caller or proxy client address).
    pub client: Option<String>,
}

impl AuditRecord {
    /// Builds a record from a verdict.
    pub fn new(check: CheckKind, subject: impl Into<String>, verdict: &Verdict, elapsed: Duration) -> Self {
        Self {
            check,
            subject: subject.into(),
            status: verdict.decision.status_str().to_string(),
            message: verdict.decision.message().to_string(),
            source: verdict.source.as_str().to_string(),
            latency_ms: elapsed.as_millis() as u64,
            client: None,
        }
    }

    /// Sets the client.
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Records one decision. Must not fail the caller.
    fn record(&self, record: &AuditRecord);
}

/// Writes audit records to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        let client = record.client.as_deref().unwrap_or("-");
        if record.status == Decision::Allow.status_str() {
            info!(
                check = record.check.as_str(),
                subject = %record.subject,
                status = %record.status,
                source = %record.source,
                latency_ms = record.latency_ms,
                client,
                "Decision"
            );
        } else {
            warn!(
                check = record.check.as_str(),
                subject = %record.subject,
                status = %record.status,
                message = %record.message,
                source = %record.source,
                latency_ms = record.latency_ms,
                client,
                "Decision"
            );
        }
    }
}

/// Forwards each record to several sinks.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    /// Creates an empty fanout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, record: &AuditRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}
