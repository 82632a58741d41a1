//! Streaming body transform.
//!
//! Each inspected response body gets its own task. The task owns the flow's
//! [`FlowState`], pulls frames from upstream, runs them through the
//! [`ContentInspector`] and pushes whatever it releases into a channel that
//! backs the downstream body.
//!
//! The task ends when the body ends, when upstream fails, or when the
//! client drops the downstream body. In the last two cases the state is
//! dropped without a final hash check.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, StreamBody};
use hudsucker::Body;
use hyper::body::Frame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use warden_core::{ContentInspector, FlowState};

type FrameResult = Result<Frame<Bytes>, hudsucker::Error>;

/// Frames buffered between the inspection task and the client.
const CHANNEL_DEPTH: usize = 8;

/// Replaces `body` with an inspected stream.
pub fn inspect_body(inspector: Arc<ContentInspector>, state: FlowState, body: Body) -> Body {
    spawn_inspection(inspector, state, body).0
}

fn spawn_inspection(
    inspector: Arc<ContentInspector>,
    state: FlowState,
    body: Body,
) -> (Body, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<FrameResult>(CHANNEL_DEPTH);
    let handle = tokio::spawn(drive(inspector, state, body, tx));
    let downstream = Body::from(StreamBody::new(ReceiverStream::new(rx)).boxed());
    (downstream, handle)
}

async fn drive(
    inspector: Arc<ContentInspector>,
    mut state: FlowState,
    mut upstream: Body,
    tx: mpsc::Sender<FrameResult>,
) {
    loop {
        let (chunk, end) = match upstream.frame().await {
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) if data.is_empty() => continue,
                Ok(data) => (data, false),
                // Trailers are not forwarded.
                Err(_) => continue,
            },
            Some(Err(e)) => {
                warn!(flow_id = state.flow_id(), url = %state.url(), error = %e, "Upstream body failed, abandoning flow");
                return;
            }
            None => (Bytes::new(), true),
        };

        if tx.is_closed() {
            debug!(flow_id = state.flow_id(), "Client went away, abandoning flow");
            return;
        }

        for piece in inspector.process(&mut state, &chunk).await {
            if piece.is_empty() {
                continue;
            }
            if tx.send(Ok(Frame::data(Bytes::from(piece)))).await.is_err() {
                debug!(flow_id = state.flow_id(), "Client went away, abandoning flow");
                return;
            }
        }

        if end {
            info!(
                flow_id = state.flow_id(),
                url = %state.url(),
                sha256 = state.sha256_hex().unwrap_or_default(),
                md5 = state.md5_hex().unwrap_or_default(),
                mime = state.sniffed_mime().unwrap_or_default(),
                bytes_in = state.bytes_in(),
                bytes_out = state.bytes_out(),
                blocked = state.is_blocked(),
                "Response inspected"
            );
            return;
        }
    }
}
