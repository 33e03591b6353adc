use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::Response,
};
use std::time::Instant;
use tracing::debug;

use super::serve_cached;
use crate::policy::Endpoint;
use crate::request::StorefrontRequest;
use crate::server::response::{X_CACHE, respond};
use crate::server::state::AppState;

const ENDPOINT: Endpoint = Endpoint::Storefront;

/// `POST /api/storefront`
///
/// Cart actions go straight to the origin; everything else is cached.
pub async fn storefront(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let req = match StorefrontRequest::from_body(&body) {
        Ok(req) => req,
        Err(e) => return respond(ENDPOINT, state.policies.get(ENDPOINT), &headers, start, Err(e)),
    };

    if let Some(action) = req.action_type.as_deref() {
        debug!(shop = %req.shop, action, "Cart action, bypassing cache");
        let result = state.gateway.serve_bypass(req.origin_request()).await;
        let mut response = respond(ENDPOINT, state.policies.get(ENDPOINT), &headers, start, result);
        // Failed actions never touched the cache either
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("BYPASS"));
        return response;
    }

    serve_cached(
        &state,
        ENDPOINT,
        &headers,
        start,
        Ok((req.cache_key(), req.origin_request())),
    )
    .await
}
