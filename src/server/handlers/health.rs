use axum::{
    Json,
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::server::state::AppState;

/// Health check endpoint
///
/// Returns service status, version, in-flight origin calls, pending cache
/// writes, and uptime.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cache_store": state.gateway.cache().store_kind(),
        "in_flight": state.gateway.in_flight(),
        "pending_cache_writes": state.gateway.cache().pending_writes(),
        "uptime_seconds": state.started.elapsed().as_secs(),
        "started_at": state.started_at.to_rfc3339(),
    }))
}

/// Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> Response {
    let mut response = state.metrics.render().into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
