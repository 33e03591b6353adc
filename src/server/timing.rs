//! Outermost middleware stamping every response, including CORS preflights
//! answered before routing.

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use super::response::{X_CACHE, X_RESPONSE_TIME};

/// Add `X-Response-Time`, and `X-Cache: BYPASS` when no handler set one.
pub async fn stamp_response(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", start.elapsed().as_millis())) {
        headers.insert(X_RESPONSE_TIME, value);
    }
    if !headers.contains_key(X_CACHE) {
        headers.insert(X_CACHE, HeaderValue::from_static("BYPASS"));
    }
    response
}
