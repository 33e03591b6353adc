//! Shared response cache.
//!
//! [`CacheStore`] is the raw key-value backend (in-process or Valkey).
//! [`Cache`] wraps a store and enforces the gateway's caching contract:
//! read failures become misses, writes are detached from the request path.

pub mod key;
pub mod memory;
pub mod staleness;
#[cfg(feature = "valkey")]
pub mod valkey;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

pub use key::{CacheKey, KeyFields};
pub use memory::MemoryStore;
pub use staleness::{Freshness, classify};

use crate::metrics;

/// How a response was produced, reported in the `X-Cache` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh cache entry
    Hit,
    /// Freshly fetched from the origin
    Miss,
    /// Origin failed, served a retained entry past its freshness window
    Stale,
    /// Cache and coalescer skipped entirely
    Bypass,
}

impl CacheStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached origin response.
///
/// The payload is kept as raw JSON text so it is passed back to clients
/// byte-for-byte as the origin produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: Box<RawValue>,
    #[serde(with = "epoch_millis")]
    pub written_at: SystemTime,
    pub etag: String,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(payload: Box<RawValue>, etag: String) -> Self {
        Self {
            payload,
            written_at: SystemTime::now(),
            etag,
        }
    }

    /// Time elapsed since the entry was written, zero if the clock went backwards.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.written_at).unwrap_or_default()
    }
}

/// Serde helper: SystemTime ↔ u64 epoch milliseconds
mod epoch_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

/// Errors from a cache backend. Never surfaced to clients.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache read failed: {0}")]
    Read(String),
    #[error("cache write failed: {0}")]
    Write(String),
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

/// Key-value backend with per-entry hard TTL enforced by the store itself.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read an entry. `Ok(None)` when absent or evicted.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Write (overwrite) an entry that the store evicts after `ttl`.
    async fn put(&self, key: &CacheKey, entry: &CacheEntry, ttl: Duration)
    -> Result<(), CacheError>;

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;

    /// Drop entries past their hard TTL. Backends with native expiry do nothing.
    async fn purge_expired(&self) -> usize {
        0
    }

    /// Short backend label for logs and health output.
    fn kind(&self) -> &'static str;
}

/// Cache front used by the gateway.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    writes: TaskTracker,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            writes: TaskTracker::new(),
        }
    }

    /// Look up an entry, treating any backend failure as a miss.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Ok(entry) => entry,
            // Not deleted, another writer may already have replaced it
            Err(CacheError::Corrupt(reason)) => {
                warn!(key = %key, %reason, "Ignoring corrupt cache entry");
                metrics::record_cache_store_error("corrupt");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                metrics::record_cache_store_error("read");
                None
            }
        }
    }

    /// Schedule a write without waiting for it.
    ///
    /// The write runs on a tracked task so shutdown can wait for it via
    /// [`Cache::wait_for_writes`].
    pub fn store_detached(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) {
        let store = Arc::clone(&self.store);
        self.writes.spawn(async move {
            match store.put(&key, &entry, ttl).await {
                Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache entry stored"),
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache write failed");
                    metrics::record_cache_store_error("write");
                }
            }
        });
    }

    /// Wait until every detached write scheduled so far has completed.
    pub async fn wait_for_writes(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub async fn purge_expired(&self) -> usize {
        self.store.purge_expired().await
    }

    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }
}
