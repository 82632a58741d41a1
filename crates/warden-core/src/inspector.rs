//! Streaming content inspection.
//!
//! A [`ContentInspector`] hashes and classifies a response body while it is
//! still flowing. Each flow owns one [`FlowState`]; the inspector itself is
//! stateless and shared.
//!
//! ```text
//!   INIT ──first chunk──> FIRST_CHUNK ──mime ok──> STREAMING ⇄ DRAINING ──EOF──> DONE
//!     │                        │                        │          │
//!     └────────────────────────┴──── block ─────────────┴──────────┴──> BLOCKED
//! ```
//!
//! Per non-empty chunk:
//!
//! 1. The chunk is hashed (SHA-256 and MD5) and appended to the buffer.
//! 2. The first chunk is sniffed and its real type checked. A block
//!    discards the buffer and stops all further output.
//! 3. While the configured delay lasts, nothing is emitted.
//! 4. After that, one window (default 8192 bytes) leaves the front of the
//!    buffer per chunk.
//!
//! An empty chunk means end of body. The final SHA-256 is checked; a block
//! drops everything still buffered, otherwise the buffer is flushed.
//!
//! ## Containment
//!
//! Only bytes still buffered at end of body can be held back by a hash
//! block. Windows released before that have reached the client. The hold
//! back is bounded by `pending_delay` chunks plus whatever outpaces the
//! window size. Full containment would require buffering whole bodies,
//! which this inspector deliberately does not do.

use std::sync::Arc;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::decision::Decision;
use crate::service::DecisionService;
use crate::sniff::sniff_mime;

/// Default number of chunks held back after the first one.
pub const DEFAULT_PENDING_DELAY: u32 = 2;
/// Default size of one emitted window.
pub const DEFAULT_WINDOW_SIZE: usize = 8192;

/// Inspector tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Chunks to hold back before draining starts.
    pub pending_delay: u32,
    /// Bytes released per chunk once draining.
    pub window_size: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            pending_delay: DEFAULT_PENDING_DELAY,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// Where a flow is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No bytes yet.
    Init,
    /// First chunk under classification.
    FirstChunk,
    /// Holding back chunks while the delay lasts.
    Streaming,
    /// Releasing one window per chunk.
    Draining,
    /// End of body reached, everything flushed.
    Done,
    /// Output stopped for good.
    Blocked,
}

/// Per-flow inspection state. Never shared between flows.
pub struct FlowState {
    flow_id: u64,
    url: String,
    accumulated: Vec<u8>,
    sha256: Sha256,
    md5: Md5,
    sniffed: Option<&'static str>,
    pending_delay: u32,
    phase: Phase,
    blocked: bool,
    finished: bool,
    bytes_in: u64,
    bytes_out: u64,
    sha256_hex: Option<String>,
    md5_hex: Option<String>,
    block_reason: Option<String>,
}

impl FlowState {
    /// Creates state for a new response body.
    pub fn new(flow_id: u64, url: impl Into<String>, config: &InspectorConfig) -> Self {
        Self {
            flow_id,
            url: url.into(),
            accumulated: Vec::new(),
            sha256: Sha256::new(),
            md5: Md5::new(),
            sniffed: None,
            pending_delay: config.pending_delay,
            phase: Phase::Init,
            blocked: false,
            finished: false,
            bytes_in: 0,
            bytes_out: 0,
            sha256_hex: None,
            md5_hex: None,
            block_reason: None,
        }
    }

    /// Flow identifier.
    pub fn flow_id(&self) -> u64 {
        self.flow_id
    }

    /// URL of the response.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns true once output has been stopped.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Returns true once the end-of-body chunk was processed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Sniffed content type, once known.
    pub fn sniffed_mime(&self) -> Option<&'static str> {
        self.sniffed
    }

    /// Bytes currently held back.
    pub fn buffered(&self) -> usize {
        self.accumulated.len()
    }

    /// Total body bytes received.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Total body bytes released.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Final SHA-256, available after end of body.
    pub fn sha256_hex(&self) -> Option<&str> {
        self.sha256_hex.as_deref()
    }

    /// Final MD5, available after end of body.
    pub fn md5_hex(&self) -> Option<&str> {
        self.md5_hex.as_deref()
    }

    /// Why output was stopped.
    pub fn block_reason(&self) -> Option<&str> {
        self.block_reason.as_deref()
    }

    fn take_window(&mut self, size: usize) -> Vec<u8> {
        let size = size.min(self.accumulated.len());
        let window: Vec<u8> = self.accumulated.drain(..size).collect();
        self.bytes_out += window.len() as u64;
        window
    }

    fn take_all(&mut self) -> Vec<u8> {
        let rest = std::mem::take(&mut self.accumulated);
        self.bytes_out += rest.len() as u64;
        rest
    }

    fn block(&mut self, reason: &str) {
        self.accumulated.clear();
        self.blocked = true;
        self.phase = Phase::Blocked;
        self.block_reason = Some(reason.to_string());
    }
}

/// Drives [`FlowState`]s through the inspection state machine.
pub struct ContentInspector {
    service: Arc<dyn DecisionService>,
    config: InspectorConfig,
}

impl ContentInspector {
    /// Creates an inspector that asks `service` for MIME and hash decisions.
    pub fn new(service: Arc<dyn DecisionService>, config: InspectorConfig) -> Self {
        Self { service, config }
    }

    /// Tuning in use.
    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Starts state for a new flow.
    pub fn start(&self, flow_id: u64, url: impl Into<String>) -> FlowState {
        FlowState::new(flow_id, url, &self.config)
    }

    /// Processes one body chunk and returns the chunks to send downstream.
    ///
    /// An empty `chunk` signals end of body; the returned sequence then ends
    /// with an empty terminal chunk. Chunks after end of body are ignored.
    pub async fn process(&self, state: &mut FlowState, chunk: &[u8]) -> Vec<Vec<u8>> {
        if state.finished {
            return Vec::new();
        }

        state.sha256.update(chunk);
        state.md5.update(chunk);
        state.bytes_in += chunk.len() as u64;
        if !state.blocked {
            state.accumulated.extend_from_slice(chunk);
        }

        if chunk.is_empty() {
            return self.finish(state).await;
        }

        if state.blocked {
            return Vec::new();
        }

        if state.sniffed.is_none() {
            state.phase = Phase::FirstChunk;
            let mime = sniff_mime(chunk);
            let verdict = self.service.check_mime(mime).await;
            match verdict.decision {
                Decision::Block { reason, .. } => {
                    info!(flow_id = state.flow_id, url = %state.url, mime, reason = %reason, "Blocked response by content type");
                    state.block(&reason);
                }
                Decision::Allow => {
                    debug!(flow_id = state.flow_id, mime, "Content type allowed");
                }
                other => {
                    warn!(flow_id = state.flow_id, mime, status = other.status_str(), "Unexpected content type decision, continuing");
                }
            }
            state.sniffed = Some(mime);
            if !state.blocked {
                state.pending_delay = state.pending_delay.saturating_sub(1);
                state.phase = Phase::Streaming;
            }
            return Vec::new();
        }

        if state.pending_delay > 0 {
            state.pending_delay -= 1;
            state.phase = Phase::Streaming;
            return Vec::new();
        }

        state.phase = Phase::Draining;
        vec![state.take_window(self.config.window_size)]
    }

    async fn finish(&self, state: &mut FlowState) -> Vec<Vec<u8>> {
        state.finished = true;
        let sha256 = hex::encode(state.sha256.clone().finalize());
        let md5 = hex::encode(state.md5.clone().finalize());
        state.sha256_hex = Some(sha256.clone());
        state.md5_hex = Some(md5);

        // Runs even for flows already blocked so the hash is audited.
        let verdict = self.service.check_hash(&sha256).await;
        let mut out = Vec::new();
        match verdict.decision {
            Decision::Block { reason, .. } => {
                info!(
                    flow_id = state.flow_id,
                    url = %state.url,
                    sha256 = %sha256,
                    released = state.bytes_out,
                    withheld = state.accumulated.len(),
                    reason = %reason,
                    "Blocked response by hash"
                );
                state.block(&reason);
            }
            Decision::Allow => {}
            other => {
                warn!(flow_id = state.flow_id, sha256 = %sha256, status = other.status_str(), "Unexpected hash decision, releasing body");
            }
        }

        if !state.blocked {
            let rest = state.take_all();
            if !rest.is_empty() {
                out.push(rest);
            }
            state.phase = Phase::Done;
        }
        out.push(Vec::new());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{Verdict, VerdictSource};
    use crate::policy::PolicyEngine;
    use crate::rules::MemoryRuleStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn inspector(store: MemoryRuleStore, config: InspectorConfig) -> ContentInspector {
        ContentInspector::new(Arc::new(PolicyEngine::local_only(Arc::new(store))), config)
    }

    async fn run(inspector: &ContentInspector, chunks: &[&[u8]]) -> (Vec<Vec<u8>>, FlowState) {
        let mut state = inspector.start(1, "https://files.example/download");
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(inspector.process(&mut state, chunk).await);
        }
        out.extend(inspector.process(&mut state, b"").await);
        (out, state)
    }

    fn concat(chunks: &[Vec<u8>]) -> Vec<u8> {
        chunks.iter().flatten().copied().collect()
    }

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[tokio::test]
    async fn allowed_stream_is_lossless_and_ordered() {
        let inspector = inspector(MemoryRuleStore::new(), InspectorConfig::default());
        let chunks: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; 5000]).collect();
        let refs: Vec<&[u8]> = chunks.iter().map(|c| c.as_slice()).collect();

        let (out, state) = run(&inspector, &refs).await;

        assert_eq!(concat(&out), concat(&chunks));
        assert_eq!(out.last(), Some(&Vec::<u8>::new()));
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.bytes_in(), state.bytes_out());
        assert_eq!(state.sha256_hex(), Some(sha256_hex(&concat(&chunks)).as_str()));
    }

    #[tokio::test]
    async fn first_chunk_and_delay_emit_nothing() {
        let inspector = inspector(
            MemoryRuleStore::new(),
            InspectorConfig {
                pending_delay: 3,
                window_size: 4,
            },
        );
        let mut state = inspector.start(7, "https://a.example/");

        // First chunk: sniff, delay 3 -> 2.
        assert!(inspector.process(&mut state, b"hello").await.is_empty());
        assert_eq!(state.phase(), Phase::Streaming);
        // Delay 2 -> 1, 1 -> 0.
        assert!(inspector.process(&mut state, b" wor").await.is_empty());
        assert!(inspector.process(&mut state, b"ld, ").await.is_empty());
        // Draining: one 4-byte window per chunk, FIFO.
        assert_eq!(inspector.process(&mut state, b"bye").await, vec![b"hell".to_vec()]);
        assert_eq!(state.phase(), Phase::Draining);
        assert_eq!(inspector.process(&mut state, b"!").await, vec![b"o wo".to_vec()]);
        assert_eq!(state.buffered(), 9);

        let tail = inspector.process(&mut state, b"").await;
        assert_eq!(tail, vec![b"rld, bye!".to_vec(), Vec::new()]);
    }

    #[tokio::test]
    async fn zero_delay_drains_from_second_chunk() {
        let inspector = inspector(
            MemoryRuleStore::new(),
            InspectorConfig {
                pending_delay: 0,
                window_size: 8192,
            },
        );
        let mut state = inspector.start(1, "u");
        assert!(inspector.process(&mut state, b"first").await.is_empty());
        assert_eq!(
            inspector.process(&mut state, b"second").await,
            vec![b"firstsecond".to_vec()]
        );
    }

    #[tokio::test]
    async fn blocked_mime_never_emits() {
        let inspector = inspector(
            MemoryRuleStore::new().block_mime("application/x-msdownload"),
            InspectorConfig::default(),
        );
        let payload: Vec<&[u8]> = vec![&b"MZ\x90\x00payload"[..], &b"more"[..], &b"and more"[..], &b"tail"[..]];
        let (out, state) = run(&inspector, &payload).await;

        assert_eq!(out, vec![Vec::<u8>::new()]);
        assert!(state.is_blocked());
        assert_eq!(state.phase(), Phase::Blocked);
        assert_eq!(state.block_reason(), Some("Blocked MIME type"));
        assert_eq!(state.bytes_out(), 0);
        // Hashing continued over every byte for the audit trail.
        let all: Vec<u8> = payload.concat();
        assert_eq!(state.sha256_hex(), Some(sha256_hex(&all).as_str()));
        assert_eq!(state.bytes_in(), all.len() as u64);
    }

    #[tokio::test]
    async fn hash_block_truncates_unflushed_bytes() {
        let chunks: Vec<Vec<u8>> = (0..6u8).map(|i| vec![b'a' + i; 10_000]).collect();
        let body = concat(&chunks);
        let inspector = inspector(
            MemoryRuleStore::new().block_file(sha256_hex(&body), "known bad"),
            InspectorConfig::default(),
        );
        let refs: Vec<&[u8]> = chunks.iter().map(|c| c.as_slice()).collect();

        let (out, state) = run(&inspector, &refs).await;

        // Windows released before end of body are all that reached the client.
        let released = concat(&out);
        assert_eq!(released.len() as u64, state.bytes_out());
        assert!(released.len() < body.len());
        assert_eq!(released, body[..released.len()].to_vec());
        assert_eq!(out.last(), Some(&Vec::<u8>::new()));
        assert!(state.is_blocked());
        assert_eq!(state.block_reason(), Some("Blocked file hash (database)"));
        assert_eq!(state.buffered(), 0);
    }

    #[tokio::test]
    async fn small_body_is_fully_contained_by_hash_block() {
        let body = b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR";
        let inspector = inspector(
            MemoryRuleStore::new().block_file(sha256_hex(body), "eicar"),
            InspectorConfig::default(),
        );
        let (out, _) = run(&inspector, &[&body[..10], &body[10..]]).await;
        assert_eq!(out, vec![Vec::<u8>::new()]);
    }

    #[tokio::test]
    async fn empty_body_finishes_immediately() {
        let inspector = inspector(MemoryRuleStore::new(), InspectorConfig::default());
        let (out, state) = run(&inspector, &[]).await;
        assert_eq!(out, vec![Vec::<u8>::new()]);
        assert_eq!(state.phase(), Phase::Done);
        assert_eq!(state.sha256_hex(), Some(sha256_hex(b"").as_str()));
    }

    #[tokio::test]
    async fn chunks_after_eof_are_ignored() {
        let inspector = inspector(MemoryRuleStore::new(), InspectorConfig::default());
        let mut state = inspector.start(1, "u");
        inspector.process(&mut state, b"data").await;
        inspector.process(&mut state, b"").await;
        assert!(inspector.process(&mut state, b"late").await.is_empty());
        assert!(state.is_finished());
    }

    #[derive(Default)]
    struct Recorder {
        hashes: Mutex<Vec<String>>,
        mimes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DecisionService for Recorder {
        async fn check_host(&self, _host: &str) -> Verdict {
            Verdict::allow()
        }
        async fn check_url(&self, _url: &str) -> Verdict {
            Verdict::allow()
        }
        async fn check_hash(&self, sha256: &str) -> Verdict {
            self.hashes.lock().push(sha256.to_string());
            Verdict::allow()
        }
        async fn check_mime(&self, mime: &str) -> Verdict {
            self.mimes.lock().push(mime.to_string());
            Verdict::new(Decision::block("Blocked MIME type"), VerdictSource::MimeRule)
        }
    }

    #[tokio::test]
    async fn hash_is_checked_even_after_mime_block() {
        let recorder = Arc::new(Recorder::default());
        let inspector = ContentInspector::new(recorder.clone(), InspectorConfig::default());
        let (out, _) = run(&inspector, &[&b"%PDF-1.4 body"[..], &b"rest"[..]]).await;

        assert_eq!(out, vec![Vec::<u8>::new()]);
        assert_eq!(recorder.mimes.lock().as_slice(), ["application/pdf"]);
        assert_eq!(
            recorder.hashes.lock().as_slice(),
            [sha256_hex(b"%PDF-1.4 bodyrest")]
        );
    }

    #[tokio::test]
    async fn flows_are_independent() {
        let inspector = Arc::new(inspector(MemoryRuleStore::new(), InspectorConfig::default()));
        let mut handles = Vec::new();
        for id in 0..8u8 {
            let inspector = inspector.clone();
            handles.push(tokio::spawn(async move {
                let body: Vec<Vec<u8>> = (0..10).map(|n| vec![id; 1000 + n]).collect();
                let mut state = inspector.start(id as u64, "u");
                let mut out = Vec::new();
                for chunk in &body {
                    out.extend(inspector.process(&mut state, chunk).await);
                    tokio::task::yield_now().await;
                }
                out.extend(inspector.process(&mut state, b"").await);
                (concat(&out), concat(&body))
            }));
        }
        for handle in handles {
            let (out, body) = handle.await.unwrap();
            assert_eq!(out, body);
        }
    }
}
