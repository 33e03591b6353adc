//! Valkey/Redis-backed cache store, shared by every gateway instance.
//!
//! Expiry is native (`SET .. EX`), so purging is a no-op here.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::info;

use super::{CacheEntry, CacheError, CacheKey, CacheStore};

#[derive(Clone)]
pub struct ValkeyStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl ValkeyStore {
    /// Connect to Valkey and keep a self-healing connection manager.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Valkey cache store at {}", url);
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn store_key(&self, key: &CacheKey) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for ValkeyStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.conn.clone();
        let json = redis::cmd("GET")
            .arg(self.store_key(key))
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| CacheError::Read(e.to_string()))?;

        match json {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &CacheKey,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(entry).map_err(|e| CacheError::Write(e.to_string()))?;
        let mut conn = self.conn.clone();
        // EX 0 is rejected by the server
        let ttl_secs = ttl.as_secs().max(1);
        redis::cmd("SET")
            .arg(self.store_key(key))
            .arg(json)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::Write(e.to_string()))
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.store_key(key))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::Write(e.to_string()))
    }

    fn kind(&self) -> &'static str {
        "valkey"
    }
}
