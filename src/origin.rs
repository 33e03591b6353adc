//! Outbound calls to the origin APIs.
//!
//! One call per request, bounded by the endpoint's timeout. No retries: a
//! failed call is handed back to the gateway, which decides between serving
//! a stale entry and failing with 503.

use reqwest::Client;
use reqwest::header::{ACCEPT, ETAG};
use serde_json::Value;
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::policy::{Endpoint, OriginTarget, Policies};

/// Header carrying the calling endpoint to protected origins.
pub const EDGE_ENDPOINT_HEADER: &str = "x-edge-endpoint";
/// Header carrying the shop domain to protected origins.
pub const SHOP_DOMAIN_HEADER: &str = "x-shop-domain";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OriginMethod {
    Get,
    Post,
}

/// A validated request, ready to forward to the origin.
#[derive(Clone, Debug)]
pub struct OriginRequest {
    pub endpoint: Endpoint,
    pub method: OriginMethod,
    /// Path segments appended to the origin base URL
    pub path: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Normalized shop domain, forwarded to protected origins
    pub shop: String,
}

/// A successful origin response.
#[derive(Debug)]
pub struct OriginResponse {
    pub payload: Box<RawValue>,
    pub etag: String,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OriginError {
    #[error("{endpoint} origin timed out after {timeout_ms}ms")]
    Timeout {
        endpoint: &'static str,
        timeout_ms: u64,
    },
    #[error("{endpoint} origin unreachable: {reason}")]
    Unreachable {
        endpoint: &'static str,
        reason: String,
    },
    #[error("{endpoint} origin responded with status {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("{endpoint} origin returned an invalid payload: {reason}")]
    InvalidPayload {
        endpoint: &'static str,
        reason: String,
    },
    #[error("{endpoint} origin URL cannot be built: {reason}")]
    InvalidUrl {
        endpoint: &'static str,
        reason: String,
    },
}

impl OriginError {
    /// Short label for metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            OriginError::Timeout { .. } => "timeout",
            OriginError::Unreachable { .. } => "unreachable",
            OriginError::Status { .. } => "status",
            OriginError::InvalidPayload { .. } => "payload",
            OriginError::InvalidUrl { .. } => "url",
        }
    }
}

/// Upstream credentials, injected only for allow-listed hosts.
#[derive(Clone, Debug, Default)]
pub struct UpstreamAuth {
    pub protected_hosts: Vec<String>,
    pub token: Option<String>,
}

impl UpstreamAuth {
    fn token_for(&self, url: &Url) -> Option<&str> {
        let host = url.host_str()?;
        if self
            .protected_hosts
            .iter()
            .any(|protected| protected.eq_ignore_ascii_case(host))
        {
            self.token.as_deref()
        } else {
            None
        }
    }
}

/// HTTP client for the primary and "think" origins.
#[derive(Clone, Debug)]
pub struct OriginClient {
    http: Client,
    primary: Url,
    think: Url,
    auth: UpstreamAuth,
    policies: Arc<Policies>,
}

impl OriginClient {
    pub fn new(
        http: Client,
        primary: Url,
        think: Url,
        auth: UpstreamAuth,
        policies: Arc<Policies>,
    ) -> Self {
        Self {
            http,
            primary,
            think,
            auth,
            policies,
        }
    }

    /// Issue one call to the endpoint's origin.
    pub async fn fetch(&self, request: &OriginRequest) -> Result<OriginResponse, OriginError> {
        let endpoint = request.endpoint.name();
        let policy = self.policies.get(request.endpoint);
        let url = self.url_for(request)?;

        let mut builder = match request.method {
            OriginMethod::Get => self.http.get(url.clone()),
            OriginMethod::Post => self.http.post(url.clone()),
        }
        .header(ACCEPT, "application/json")
        .timeout(policy.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if policy.requires_upstream_auth
            && let Some(token) = self.auth.token_for(&url)
        {
            builder = builder
                .bearer_auth(token)
                .header(EDGE_ENDPOINT_HEADER, endpoint)
                .header(SHOP_DOMAIN_HEADER, &request.shop);
        }

        debug!(endpoint, url = %url, "Calling origin");

        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(endpoint, policy.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint, status = status.as_u16(), "Origin returned error status");
            return Err(OriginError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(endpoint, policy.timeout, e))?;

        let payload: Box<RawValue> =
            serde_json::from_slice(&body).map_err(|e| OriginError::InvalidPayload {
                endpoint,
                reason: e.to_string(),
            })?;

        Ok(OriginResponse {
            etag: etag.unwrap_or_else(|| derive_etag(&body)),
            payload,
        })
    }

    fn url_for(&self, request: &OriginRequest) -> Result<Url, OriginError> {
        let mut url = match request.endpoint.target() {
            OriginTarget::Primary => self.primary.clone(),
            OriginTarget::Think => self.think.clone(),
        };
        url.path_segments_mut()
            .map_err(|()| OriginError::InvalidUrl {
                endpoint: request.endpoint.name(),
                reason: "origin base URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(request.path.iter());
        Ok(url)
    }
}

fn classify_transport_error(
    endpoint: &'static str,
    timeout: Duration,
    error: reqwest::Error,
) -> OriginError {
    if error.is_timeout() {
        OriginError::Timeout {
            endpoint,
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        OriginError::Unreachable {
            endpoint,
            reason: error.to_string(),
        }
    }
}

/// Weak validator derived from the payload when the origin sends none.
pub fn derive_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("W/\"{}\"", hex::encode(&digest[..8]))
}
