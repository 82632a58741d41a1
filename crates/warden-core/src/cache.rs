//! TTL cache in front of expensive reputation lookups.
//!
//! Expiry is lazy: an entry older than the TTL reads as a miss but stays in
//! the backend until the next `set` overwrites it. Concurrent misses for the
//! same key share one upstream fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{LookupError, LookupResult, StoreResult};

/// Default TTL for cached lookups.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// One cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key, usually the upstream request URL.
    pub key: String,
    /// Cached response.
    pub value: Value,
    /// Unix timestamp (seconds) of the fetch.
    pub fetched_at: i64,
}

/// Persistence contract for the cache table.
pub trait CacheBackend: Send + Sync {
    /// Reads an entry regardless of age.
    fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    /// Inserts or replaces an entry.
    fn put(&self, entry: &CacheEntry) -> StoreResult<()>;

    /// Returns every entry.
    fn all(&self) -> StoreResult<Vec<CacheEntry>>;
}

/// In-memory [`CacheBackend`].
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> StoreResult<()> {
        self.entries
            .write()
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn all(&self) -> StoreResult<Vec<CacheEntry>> {
        let mut entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

type Inflight = Arc<OnceCell<Value>>;

/// Key/value cache with lazy TTL expiry and single-flight fetches.
pub struct ReputationCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    inflight: Mutex<HashMap<String, Inflight>>,
}

impl ReputationCache {
    /// Creates a cache over `backend`.
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a cache backed by memory with the default TTL.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), DEFAULT_TTL)
    }

    /// Configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the value unless absent or older than the TTL.
    ///
    /// Backend failures read as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = match self.backend.get(key) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let age = chrono::Utc::now().timestamp() - entry.fetched_at;
        if age > self.ttl.as_secs() as i64 {
            debug!(key, age, "Cache entry expired");
            return None;
        }
        Some(entry.value)
    }

    /// Stores a value, resetting its fetch time.
    pub fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.backend.put(&CacheEntry {
            key: key.to_string(),
            value,
            fetched_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Diagnostic dump of every entry, expired or not.
    pub fn get_all(&self) -> StoreResult<Vec<CacheEntry>> {
        self.backend.all()
    }

    /// Returns the cached value or runs `fetch` and caches its result.
    ///
    /// Callers that miss on the same key at the same time wait for a single
    /// fetch. Errors are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> LookupResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LookupResult<Value>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let cell = self
            .inflight
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                // A previous flight may have finished between the miss and the lock.
                if let Some(value) = self.get(key) {
                    return Ok(value);
                }
                let value = fetch().await?;
                if let Err(e) = self.set(key, value.clone()) {
                    warn!(key, error = %e, "Failed to store lookup result");
                }
                Ok::<_, LookupError>(value)
            })
            .await
            .cloned();

        let mut inflight = self.inflight.lock();
        if inflight.get(key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            inflight.remove(key);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn get_after_set_returns_value() {
        let cache = ReputationCache::in_memory();
        cache.set("k", json!({"a": 1})).unwrap();
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entry_reads_as_miss_but_is_kept() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = ReputationCache::new(backend.clone(), Duration::from_secs(60));
        backend
            .put(&CacheEntry {
                key: "old".to_string(),
                value: json!("stale"),
                fetched_at: chrono::Utc::now().timestamp() - 120,
            })
            .unwrap();

        assert_eq!(cache.get("old"), None);
        assert!(backend.get("old").unwrap().is_some());
        assert_eq!(cache.get_all().unwrap().len(), 1);
    }

    #[test]
    fn set_resets_fetch_time() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = ReputationCache::new(backend.clone(), Duration::from_secs(60));
        backend
            .put(&CacheEntry {
                key: "k".to_string(),
                value: json!(1),
                fetched_at: 0,
            })
            .unwrap();
        assert_eq!(cache.get("k"), None);

        cache.set("k", json!(2)).unwrap();
        assert_eq!(cache.get("k"), Some(json!(2)));
    }

    struct BrokenBackend;

    impl CacheBackend for BrokenBackend {
        fn get(&self, _key: &str) -> StoreResult<Option<CacheEntry>> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        fn put(&self, _entry: &CacheEntry) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        fn all(&self) -> StoreResult<Vec<CacheEntry>> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn broken_backend_still_fetches() {
        let cache = ReputationCache::new(Arc::new(BrokenBackend), DEFAULT_TTL);
        assert_eq!(cache.get("k"), None);
        let value = cache
            .get_or_fetch("k", || async { Ok(json!("fresh")) })
            .await
            .unwrap();
        assert_eq!(value, json!("fresh"));
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let cache = Arc::new(ReputationCache::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("https://feed/x", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!({"pulse_info": {"count": 0}}))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("https://feed/x").is_some());
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = ReputationCache::in_memory();
        let first = cache
            .get_or_fetch("k", || async { Err(LookupError::Timeout) })
            .await;
        assert!(matches!(first, Err(LookupError::Timeout)));
        assert_eq!(cache.get("k"), None);

        let second = cache.get_or_fetch("k", || async { Ok(json!(7)) }).await;
        assert_eq!(second.unwrap(), json!(7));
    }
}
