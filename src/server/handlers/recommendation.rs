use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::HeaderMap,
    response::Response,
};
use std::time::Instant;

use super::serve_cached;
use crate::policy::Endpoint;
use crate::request::{CartRecommendationRequest, ProductRecommendationRequest};
use crate::server::state::AppState;

/// `GET /api/v2/recommendation/product`
pub async fn product(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let start = Instant::now();
    let parsed = ProductRecommendationRequest::from_query(query.as_deref())
        .map(|req| (req.cache_key(), req.origin_request()));
    serve_cached(&state, Endpoint::ProductRecommendation, &headers, start, parsed).await
}

/// `POST /api/v2/recommendation/cart`
pub async fn cart(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let start = Instant::now();
    let parsed = CartRecommendationRequest::from_body(&body)
        .map(|req| (req.cache_key(), req.origin_request()));
    serve_cached(&state, Endpoint::CartRecommendation, &headers, start, parsed).await
}
