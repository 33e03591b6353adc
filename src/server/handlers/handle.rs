use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
};
use std::time::Instant;

use super::serve_cached;
use crate::policy::Endpoint;
use crate::request::HandleRecommendationRequest;
use crate::server::state::AppState;

/// `GET /recommendations/handle/{shop}/{productHandle}`
///
/// Captured as a wildcard so a missing segment is a 400, not a 404.
pub async fn recommendations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(rest): Path<String>,
) -> Response {
    serve(&state, &headers, &rest).await
}

/// `GET /recommendations/handle[/]`, which the wildcard never matches.
pub async fn missing_segments(State(state): State<AppState>, headers: HeaderMap) -> Response {
    serve(&state, &headers, "").await
}

async fn serve(state: &AppState, headers: &HeaderMap, rest: &str) -> Response {
    let start = Instant::now();
    let parsed = HandleRecommendationRequest::from_segments(rest)
        .map(|req| (req.cache_key(), req.origin_request()));
    serve_cached(state, Endpoint::HandleRecommendation, headers, start, parsed).await
}
