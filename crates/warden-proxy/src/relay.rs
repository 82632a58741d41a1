//! Upstream proxy relay for redirected flows.
//!
//! A redirected request cannot be handed back to the interception host:
//! its target would have to be the original absolute URL while the
//! connection goes to another authority. The relay sends it itself,
//! through a client configured with the redirect proxy, and returns the
//! upstream response as a streaming body.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, StreamBody};
use hudsucker::hyper::header::{self, HeaderMap, HeaderName};
use hudsucker::hyper::http::uri::Authority;
use hudsucker::hyper::{Request, Response};
use hudsucker::Body;
use hyper::body::Frame;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::{ProxyError, Result};

type FrameResult = std::result::Result<Frame<Bytes>, hudsucker::Error>;

const CHANNEL_DEPTH: usize = 8;

/// Connect timeout towards a redirect proxy.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-scoped headers that never cross a proxy hop.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Sends requests through upstream HTTP proxies, one client per proxy.
#[derive(Debug, Default)]
pub struct UpstreamRelay {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl UpstreamRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `req` to `url` through `proxy`.
    ///
    /// Plain HTTP targets reach the proxy in absolute form; HTTPS targets
    /// are tunnelled with CONNECT.
    pub async fn send(&self, req: Request<Body>, url: &str, proxy: &str) -> Result<Response<Body>> {
        let client = self.client(proxy)?;
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ProxyError::Http(format!("cannot read request body: {e}")))?
            .to_bytes();

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove("proxy-connection");

        let upstream = client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let mut res = Response::builder().status(upstream.status());
        if let Some(headers) = res.headers_mut() {
            *headers = upstream.headers().clone();
            strip_hop_by_hop(headers);
        }
        Ok(res.body(stream_body(upstream))?)
    }

    fn client(&self, proxy: &str) -> Result<reqwest::Client> {
        let proxy_url = format!("http://{}", proxy_authority(proxy)?);
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&proxy_url) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(proxy_url.as_str())?)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        clients.insert(proxy_url, client.clone());
        Ok(client)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

fn stream_body(mut upstream: reqwest::Response) -> Body {
    let (tx, rx) = mpsc::channel::<FrameResult>(CHANNEL_DEPTH);
    tokio::spawn(async move {
        loop {
            match upstream.chunk().await {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(Frame::data(chunk))).await.is_err() {
                        debug!("Client went away, dropping relayed body");
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "Relayed body failed");
                    return;
                }
            }
        }
    });
    Body::from(StreamBody::new(ReceiverStream::new(rx)).boxed())
}

/// Parses `http://host:port`, `host:port` or `host` into an authority.
pub(crate) fn proxy_authority(proxy: &str) -> Result<Authority> {
    let rest = proxy.trim();
    let rest = rest
        .strip_prefix("http://")
        .or_else(|| rest.strip_prefix("https://"))
        .unwrap_or(rest);
    let rest = rest.split('/').next().unwrap_or_default();
    if rest.is_empty() {
        return Err(ProxyError::Http(format!("invalid proxy address {proxy:?}")));
    }
    rest.parse::<Authority>()
        .map_err(|e| ProxyError::Http(format!("invalid proxy address {proxy:?}: {e}")))
}
