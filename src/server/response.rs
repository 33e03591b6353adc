//! Success responses and the headers shared by every response.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::{Instant, SystemTime};

use crate::cache::CacheStatus;
use crate::error::Result;
use crate::gateway::Served;
use crate::metrics;
use crate::policy::{Endpoint, EndpointPolicy};

/// Cache status of the response: HIT, MISS, STALE or BYPASS.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
/// Wall time spent producing the response, e.g. `12ms`.
pub const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");

/// Turn a gateway outcome into an HTTP response and record request metrics.
pub fn respond(
    endpoint: Endpoint,
    policy: &EndpointPolicy,
    request_headers: &HeaderMap,
    start: Instant,
    result: Result<Served>,
) -> Response {
    let response = match result {
        Ok(served) => success(policy, request_headers, served),
        Err(e) => e.into_response(),
    };
    metrics::record_request(endpoint.name(), response.status().as_u16());
    metrics::record_duration(endpoint.name(), start);
    response
}

fn success(policy: &EndpointPolicy, request_headers: &HeaderMap, served: Served) -> Response {
    let etag = HeaderValue::from_str(&served.entry.etag).ok();
    let not_modified = served.status != CacheStatus::Bypass
        && etag.as_ref().is_some_and(|etag| matches_etag(request_headers, etag));

    let mut response = if not_modified {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        let mut response = Response::new(Body::from(served.entry.payload.get().to_owned()));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    };

    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(served.status.as_str()));
    if let Some(etag) = etag {
        headers.insert(header::ETAG, etag);
    }
    if let Ok(value) = HeaderValue::from_str(&cache_control(&served, policy, SystemTime::now())) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    response
}

/// `Cache-Control` for downstream caches.
///
/// A hit may be reused only for what remains of its freshness window, a
/// miss was just fetched and gets the whole window. Degraded data must be
/// revalidated and side-effecting responses are never stored.
fn cache_control(served: &Served, policy: &EndpointPolicy, now: SystemTime) -> String {
    match served.status {
        CacheStatus::Hit => {
            let remaining = policy.freshness.saturating_sub(served.entry.age(now));
            format!("public, max-age={}", remaining.as_secs())
        }
        CacheStatus::Miss => {
            format!("public, max-age={}", policy.freshness.as_secs())
        }
        CacheStatus::Stale => "no-cache".to_string(),
        CacheStatus::Bypass => "no-store".to_string(),
    }
}

/// Whether `If-None-Match` lists the entry's validator (or `*`).
fn matches_etag(request_headers: &HeaderMap, etag: &HeaderValue) -> bool {
    let Some(candidates) = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Ok(etag) = etag.to_str() else {
        return false;
    };
    let opaque = etag.trim_start_matches("W/");
    candidates.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == opaque
    })
}
