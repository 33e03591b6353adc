//! Request pipeline shared by all cacheable endpoints.
//!
//! ```text
//! lookup ──fresh──▶ HIT
//!    │
//!    └─stale/absent─▶ coalescer ──▶ origin ──ok──▶ detached write, MISS
//!                                      └──err──▶ stale? STALE : 503
//! ```
//!
//! Side-effecting requests go through [`Gateway::serve_bypass`], which skips
//! the cache and the coalescer entirely.

use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, warn};

use crate::cache::{Cache, CacheEntry, CacheKey, CacheStatus, Freshness, classify};
use crate::coalesce::{CoalesceError, Coalescer, Role};
use crate::error::{GatewayError, Result};
use crate::metrics;
use crate::origin::{OriginClient, OriginRequest};
use crate::policy::Policies;

/// A response body together with how it was obtained.
#[derive(Clone, Debug)]
pub struct Served {
    pub entry: Arc<CacheEntry>,
    pub status: CacheStatus,
}

impl Served {
    fn new(entry: CacheEntry, status: CacheStatus) -> Self {
        Self {
            entry: Arc::new(entry),
            status,
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    origin: OriginClient,
    cache: Cache,
    coalescer: Coalescer<Served, GatewayError>,
    policies: Arc<Policies>,
    strict_internal_errors: bool,
}

impl Gateway {
    pub fn new(
        origin: OriginClient,
        cache: Cache,
        policies: Arc<Policies>,
        strict_internal_errors: bool,
    ) -> Self {
        Self {
            origin,
            cache,
            coalescer: Coalescer::new(),
            policies,
            strict_internal_errors,
        }
    }

    /// Serve a cacheable request.
    pub async fn serve_cached(&self, key: CacheKey, request: OriginRequest) -> Result<Served> {
        let endpoint = request.endpoint;
        let policy = self.policies.get(endpoint);
        if !policy.cacheable {
            return self.serve_bypass(request).await;
        }

        let stale = match self.cache.lookup(&key).await {
            Some(entry) => match classify(&entry, policy.freshness, SystemTime::now()) {
                Freshness::Fresh => {
                    debug!(endpoint = endpoint.name(), key = %key, "Cache HIT");
                    metrics::record_cache_status(endpoint.name(), CacheStatus::Hit);
                    return Ok(Served::new(entry, CacheStatus::Hit));
                }
                Freshness::Stale => Some(entry),
            },
            None => None,
        };

        debug!(
            endpoint = endpoint.name(),
            key = %key,
            has_fallback = stale.is_some(),
            "Cache MISS, fetching from origin"
        );

        let gateway = self.clone();
        let producer_key = key.clone();
        let fallback = stale.clone();
        let (role, outcome) = self
            .coalescer
            .acquire_or_join(&key, move || async move {
                gateway
                    .fetch_with_fallback(producer_key, request, fallback)
                    .await
            })
            .await;

        if role == Role::Follower {
            metrics::record_coalesced(endpoint.name());
        }

        let served = match outcome {
            Ok(served) => served,
            Err(CoalesceError::Failed(e)) => return Err(e),
            Err(CoalesceError::Aborted(reason)) => {
                self.absorb_internal_failure(endpoint.name(), reason, stale)?
            }
        };
        metrics::record_cache_status(endpoint.name(), served.status);
        Ok(served)
    }

    /// Forward a side-effecting request straight to the origin.
    ///
    /// No cache read, no coalescing, no cache write, no stale fallback.
    pub async fn serve_bypass(&self, request: OriginRequest) -> Result<Served> {
        let endpoint = request.endpoint.name();
        match self.origin.fetch(&request).await {
            Ok(response) => {
                metrics::record_cache_status(endpoint, CacheStatus::Bypass);
                Ok(Served::new(
                    CacheEntry::new(response.payload, response.etag),
                    CacheStatus::Bypass,
                ))
            }
            Err(e) => {
                error!(endpoint, error = %e, "Origin call failed for bypassed request");
                metrics::record_origin_error(endpoint, e.kind());
                Err(e.into())
            }
        }
    }

    /// Call the origin once and decide the outcome.
    ///
    /// Runs as the coalesced producer, so every joined caller shares its
    /// result, including the stale fallback.
    async fn fetch_with_fallback(
        &self,
        key: CacheKey,
        request: OriginRequest,
        stale: Option<CacheEntry>,
    ) -> Result<Served> {
        let endpoint = request.endpoint.name();
        match self.origin.fetch(&request).await {
            Ok(response) => {
                let entry = CacheEntry::new(response.payload, response.etag);
                let hard_ttl = self.policies.get(request.endpoint).hard_ttl;
                self.cache.store_detached(key, entry.clone(), hard_ttl);
                Ok(Served::new(entry, CacheStatus::Miss))
            }
            Err(e) => {
                metrics::record_origin_error(endpoint, e.kind());
                match stale {
                    Some(entry) => {
                        warn!(endpoint, key = %key, error = %e, "Origin failed, serving stale entry");
                        Ok(Served::new(entry, CacheStatus::Stale))
                    }
                    None => {
                        error!(endpoint, key = %key, error = %e, "Origin failed with no fallback");
                        Err(e.into())
                    }
                }
            }
        }
    }

    /// Handle a producer that never settled normally (panic or abort).
    fn absorb_internal_failure(
        &self,
        endpoint: &'static str,
        reason: String,
        stale: Option<CacheEntry>,
    ) -> Result<Served> {
        match stale {
            Some(entry) if !self.strict_internal_errors => {
                warn!(endpoint, %reason, "Internal failure, serving stale entry");
                Ok(Served::new(entry, CacheStatus::Stale))
            }
            _ => {
                error!(endpoint, %reason, "Internal failure while fetching from origin");
                Err(GatewayError::Internal(reason))
            }
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Number of keys with an origin call outstanding on this instance.
    pub fn in_flight(&self) -> usize {
        self.coalescer.in_flight()
    }

    /// Wait for detached cache writes, used on shutdown.
    pub async fn drain(&self) {
        self.cache.wait_for_writes().await;
    }
}
