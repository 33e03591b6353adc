//! In-process cache store.
//!
//! Enforces the hard TTL on read (expired entries are dropped and reported
//! absent) and via [`MemoryStore::purge_expired`], which the server calls
//! periodically so keys that are never read again don't pile up.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{CacheEntry, CacheError, CacheKey, CacheStore};

#[derive(Clone, Debug)]
struct StoredEntry {
    entry: CacheEntry,
    expires_at: Instant,
}

/// Thread-safe key-value store with per-entry expiry.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let now = Instant::now();
        if let Some(stored) = self.entries.get(key.as_str()) {
            if now < stored.expires_at {
                return Ok(Some(stored.entry.clone()));
            }
            // Expired: drop the read guard before removing
            drop(stored);
            // A concurrent refresh may have replaced it meanwhile
            self.entries
                .remove_if(key.as_str(), |_, stored| stored.expires_at <= now);
            debug!(key = %key, "Evicted expired cache entry");
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &CacheKey,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.entries.insert(
            key.as_str().to_string(),
            StoredEntry {
                entry: entry.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.entries.remove(key.as_str());
        Ok(())
    }

    async fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, stored| now < stored.expires_at);
        before.saturating_sub(self.entries.len())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
