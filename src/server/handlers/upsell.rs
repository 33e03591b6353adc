use axum::{body::Bytes, extract::State, http::HeaderMap, response::Response};
use std::time::Instant;

use super::serve_cached;
use crate::policy::Endpoint;
use crate::request::UpsellFunnelRequest;
use crate::server::state::AppState;

/// `POST /api/v2/funnel/upsell`
pub async fn funnel(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let start = Instant::now();
    let parsed =
        UpsellFunnelRequest::from_body(&body).map(|req| (req.cache_key(), req.origin_request()));
    serve_cached(&state, Endpoint::UpsellFunnel, &headers, start, parsed).await
}
