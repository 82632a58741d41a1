//! Bearer tokens captured from token-issuance responses.

use parking_lot::RwLock;
use serde_json::Value;

/// Receives bearer tokens seen on the wire.
pub trait TokenSink: Send + Sync {
    /// Stores a freshly issued token.
    fn store(&self, token: String);
}

/// Keeps the latest captured token in memory.
///
/// Shared between the flow controller, which fills it, and the remote
/// decision client, which sends it.
#[derive(Debug, Default)]
pub struct TokenStore {
    current: RwLock<Option<String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(Some(token.into())),
        }
    }

    /// The latest token, if any.
    pub fn get(&self) -> Option<String> {
        self.current.read().clone()
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

impl TokenSink for TokenStore {
    fn store(&self, token: String) {
        *self.current.write() = Some(token);
    }
}

/// Pulls a bearer token out of a token endpoint's JSON body.
///
/// `access_token` wins over `token`. Empty strings are ignored.
pub fn extract_token(body: &[u8]) -> Option<String> {
    let json: Value = serde_json::from_slice(body).ok()?;
    ["access_token", "token"]
        .iter()
        .filter_map(|field| json.get(field).and_then(Value::as_str))
        .find(|token| !token.is_empty())
        .map(str::to_string)
}
