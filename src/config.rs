use std::env;
use std::time::Duration;

use crate::policy::Policies;

/// Cache store backend selection
#[derive(Clone, Debug, PartialEq)]
pub enum CacheStoreType {
    Memory,
    Valkey,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Primary origin (recommendations, storefront, funnels)
    pub origin_url: String,
    /// Secondary origin serving handle-based recommendations
    pub think_origin_url: String,
    /// Hosts that receive upstream auth headers (lower-cased)
    pub protected_origin_hosts: Vec<String>,
    pub upstream_auth_token: Option<String>,
    /// Cache store backend
    pub cache_store: CacheStoreType,
    /// Valkey/Redis URL (used when cache_store = Valkey)
    pub valkey_url: Option<String>,
    /// Key prefix in the shared store (default: edge:cache)
    pub cache_key_prefix: String,
    /// Overrides every endpoint's origin timeout when set
    pub origin_timeout_ms: Option<u64>,
    /// Internal producer failures return 500 instead of degrading to stale
    pub strict_internal_errors: bool,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, origins and port are required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Check if running in dev mode
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        // Primary origin: required in prod, defaults to localhost in dev
        let origin_url = if is_dev {
            env::var("ORIGIN_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
        } else {
            env::var("ORIGIN_URL").map_err(|_| "ORIGIN_URL is required in production")?
        };

        // Handle recommendation origin: required in prod
        let think_origin_url = if is_dev {
            env::var("THINK_ORIGIN_URL")
                .unwrap_or_else(|_| "https://think.example.com".to_string())
        } else {
            env::var("THINK_ORIGIN_URL")
                .map_err(|_| "THINK_ORIGIN_URL is required in production")?
        };

        // Hosts that receive the upstream token: comma separated, case-insensitive
        let protected_origin_hosts = env::var("PROTECTED_ORIGIN_HOSTS")
            .map(|csv| {
                csv.split(',')
                    .map(|h| h.trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        // Bearer token for protected hosts (optional)
        let upstream_auth_token = env::var("UPSTREAM_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        // Cache store: memory (default) or valkey
        let cache_store = match env::var("CACHE_STORE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "valkey" | "redis" => CacheStoreType::Valkey,
            _ => CacheStoreType::Memory,
        };
        let valkey_url = env::var("VALKEY_URL").ok();
        let cache_key_prefix =
            env::var("CACHE_KEY_PREFIX").unwrap_or_else(|_| "edge:cache".to_string());

        // Origin timeout override in ms: must be positive when set
        let origin_timeout_ms = match env::var("ORIGIN_TIMEOUT_MS") {
            Ok(raw) => Some(
                raw.parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .ok_or("ORIGIN_TIMEOUT_MS must be a positive integer")?,
            ),
            Err(_) => None,
        };

        // Strict internal errors: defaults to on in dev
        let strict_internal_errors = env::var("STRICT_INTERNAL_ERRORS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(is_dev);

        Ok(Config {
            port,
            is_dev,
            origin_url,
            think_origin_url,
            protected_origin_hosts,
            upstream_auth_token,
            cache_store,
            valkey_url,
            cache_key_prefix,
            origin_timeout_ms,
            strict_internal_errors,
        })
    }

    /// Endpoint policy table with the configured timeout override applied.
    pub fn policies(&self) -> Policies {
        match self.origin_timeout_ms {
            Some(ms) => Policies::default().with_timeout(Duration::from_millis(ms)),
            None => Policies::default(),
        }
    }
}
