pub mod handle;
pub mod health;
pub mod recommendation;
pub mod storefront;
pub mod upsell;

use axum::{
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::time::Instant;

use super::response::respond;
use super::state::AppState;
use crate::cache::CacheKey;
use crate::error::{GatewayError, Result};
use crate::origin::OriginRequest;
use crate::policy::Endpoint;

/// Run a validated, cacheable request through the gateway.
async fn serve_cached(
    state: &AppState,
    endpoint: Endpoint,
    headers: &HeaderMap,
    start: Instant,
    parsed: Result<(CacheKey, OriginRequest)>,
) -> Response {
    let result = match parsed {
        Ok((key, request)) => state.gateway.serve_cached(key, request).await,
        Err(e) => Err(e),
    };
    respond(endpoint, state.policies.get(endpoint), headers, start, result)
}

/// Bare `OPTIONS`; CORS headers are added by the CORS layer.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Matched path, wrong method.
pub async fn method_not_allowed(method: Method) -> GatewayError {
    GatewayError::MethodNotAllowed(method.to_string())
}

/// Unmatched path. `OPTIONS` is answered on every path.
pub async fn not_found(method: Method, uri: Uri) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    GatewayError::NotFound(uri.path().to_string()).into_response()
}
