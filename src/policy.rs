//! Per-endpoint cache and origin policies.
//!
//! Every inbound route maps to exactly one [`Endpoint`]. The [`Policies`]
//! table is built once at startup and is read-only afterwards.

use std::time::Duration;

/// The five gateway endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ProductRecommendation,
    CartRecommendation,
    Storefront,
    UpsellFunnel,
    HandleRecommendation,
}

/// Which origin server an endpoint is proxied to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OriginTarget {
    /// The primary API origin (recommendations, cart rules, funnels)
    Primary,
    /// The secondary "think" origin serving handle-based recommendations
    Think,
}

impl Endpoint {
    pub const ALL: [Endpoint; 5] = [
        Endpoint::ProductRecommendation,
        Endpoint::CartRecommendation,
        Endpoint::Storefront,
        Endpoint::UpsellFunnel,
        Endpoint::HandleRecommendation,
    ];

    /// Stable label used in logs and metrics.
    pub const fn name(self) -> &'static str {
        match self {
            Endpoint::ProductRecommendation => "product_recommendation",
            Endpoint::CartRecommendation => "cart_recommendation",
            Endpoint::Storefront => "storefront",
            Endpoint::UpsellFunnel => "upsell_funnel",
            Endpoint::HandleRecommendation => "handle_recommendation",
        }
    }

    /// Cache key prefix. Distinct per endpoint so identical field sets on
    /// two endpoints never share an entry.
    pub const fn namespace(self) -> &'static str {
        match self {
            Endpoint::ProductRecommendation => "rec_product_",
            Endpoint::CartRecommendation => "rec_cart_",
            Endpoint::Storefront => "storefront_",
            Endpoint::UpsellFunnel => "upsell_",
            Endpoint::HandleRecommendation => "rec_handle_",
        }
    }

    pub const fn target(self) -> OriginTarget {
        match self {
            Endpoint::HandleRecommendation => OriginTarget::Think,
            _ => OriginTarget::Primary,
        }
    }

    const fn index(self) -> usize {
        match self {
            Endpoint::ProductRecommendation => 0,
            Endpoint::CartRecommendation => 1,
            Endpoint::Storefront => 2,
            Endpoint::UpsellFunnel => 3,
            Endpoint::HandleRecommendation => 4,
        }
    }
}

/// Static cache/origin configuration for one endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointPolicy {
    /// Soft TTL: entries older than this are served only as a fallback
    pub freshness: Duration,
    /// Hard TTL handed to the cache store for eviction
    pub hard_ttl: Duration,
    /// Whether responses may be cached and coalesced at all
    pub cacheable: bool,
    /// Bound on a single origin call
    pub timeout: Duration,
    /// Inject upstream auth headers when the origin host is protected
    pub requires_upstream_auth: bool,
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Policy table indexed by [`Endpoint`].
#[derive(Clone, Debug)]
pub struct Policies {
    table: [EndpointPolicy; 5],
}

impl Policies {
    /// Get the policy for an endpoint.
    pub fn get(&self, endpoint: Endpoint) -> &EndpointPolicy {
        &self.table[endpoint.index()]
    }

    /// Replace every endpoint's origin timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        for policy in &mut self.table {
            policy.timeout = timeout;
        }
        self
    }
}

impl Default for Policies {
    fn default() -> Self {
        let policy = |freshness: u64, hard_ttl: u64, timeout: u64, auth: bool| EndpointPolicy {
            freshness: Duration::from_secs(freshness),
            hard_ttl: Duration::from_secs(hard_ttl),
            cacheable: true,
            timeout: Duration::from_secs(timeout),
            requires_upstream_auth: auth,
        };

        Self {
            table: [
                policy(HOUR, 24 * HOUR, 10, true),
                policy(HOUR, 24 * HOUR, 10, true),
                // Cart-rule evaluation is heavier on the origin
                policy(5 * MINUTE, HOUR, 15, true),
                policy(30 * MINUTE, 12 * HOUR, 10, true),
                // Third-party origin, never sees our credentials
                policy(10 * MINUTE, 6 * HOUR, 10, false),
            ],
        }
    }
}
