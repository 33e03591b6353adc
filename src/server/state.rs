use crate::cache::{Cache, CacheStore, MemoryStore};
use crate::config::{CacheStoreType, Config};
use crate::gateway::Gateway;
use crate::metrics;
use crate::origin::{OriginClient, UpstreamAuth};
use crate::policy::Policies;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Endpoint policies, shared with the origin client
    pub policies: Arc<Policies>,
    /// Cache, coalescer and origin pipeline
    pub gateway: Gateway,
    /// Prometheus render handle for `/metrics`
    pub metrics: PrometheusHandle,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}

impl AppState {
    /// Create state over an explicit cache store.
    pub fn new(
        config: Config,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let http_client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(32)
            .build()?;

        let primary = Url::parse(&config.origin_url)
            .map_err(|e| format!("ORIGIN_URL is not a valid URL: {e}"))?;
        let think = Url::parse(&config.think_origin_url)
            .map_err(|e| format!("THINK_ORIGIN_URL is not a valid URL: {e}"))?;

        let auth = UpstreamAuth {
            protected_hosts: config.protected_origin_hosts.clone(),
            token: config.upstream_auth_token.clone(),
        };
        if !auth.protected_hosts.is_empty() && auth.token.is_none() {
            warn!("PROTECTED_ORIGIN_HOSTS set without UPSTREAM_AUTH_TOKEN, no auth will be sent");
        }

        let policies = Arc::new(config.policies());
        let origin = OriginClient::new(http_client, primary, think, auth, Arc::clone(&policies));
        let gateway = Gateway::new(
            origin,
            Cache::new(store),
            Arc::clone(&policies),
            config.strict_internal_errors,
        );

        Ok(Self {
            config: Arc::new(config),
            policies,
            gateway,
            metrics: metrics::init(),
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }

    /// Create state with the cache store selected by the configuration.
    pub async fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let store = select_store(&config).await;
        info!("Cache store: {}", store.kind());
        Self::new(config, store)
    }
}

async fn select_store(config: &Config) -> Arc<dyn CacheStore> {
    match config.cache_store {
        CacheStoreType::Memory => Arc::new(MemoryStore::new()),
        CacheStoreType::Valkey => match connect_valkey(config).await {
            Some(store) => store,
            None => {
                warn!("Falling back to in-memory cache store");
                Arc::new(MemoryStore::new())
            }
        },
    }
}

#[cfg(feature = "valkey")]
async fn connect_valkey(config: &Config) -> Option<Arc<dyn CacheStore>> {
    use crate::cache::valkey::ValkeyStore;

    let Some(url) = config.valkey_url.as_deref() else {
        warn!("CACHE_STORE=valkey but VALKEY_URL is not set");
        return None;
    };
    match ValkeyStore::connect(url, &config.cache_key_prefix).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("Failed to connect to Valkey at {}: {}", url, e);
            None
        }
    }
}

#[cfg(not(feature = "valkey"))]
async fn connect_valkey(_config: &Config) -> Option<Arc<dyn CacheStore>> {
    warn!("CACHE_STORE=valkey but this build lacks the `valkey` feature");
    None
}
