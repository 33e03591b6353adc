//! Request errors and the JSON envelope they render as.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::cache::CacheStatus;
use crate::origin::OriginError;
use crate::server::response::X_CACHE;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Request-level failures, each mapped to one HTTP status.
///
/// Cache backend failures never appear here; the cache layer absorbs them.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("No route for {0}")]
    NotFound(String),

    #[error("Origin request timed out")]
    OriginTimeout { endpoint: &'static str },

    #[error("Origin unavailable")]
    OriginUnreachable { endpoint: &'static str },

    #[error("Origin returned an error")]
    OriginError { endpoint: &'static str },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::OriginTimeout { .. }
            | GatewayError::OriginUnreachable { .. }
            | GatewayError::OriginError { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Cache status reported alongside the error.
    ///
    /// Errors raised before the cache is consulted are BYPASS; errors after a
    /// failed origin call are MISS.
    pub fn cache_status(&self) -> CacheStatus {
        match self {
            GatewayError::Validation(_)
            | GatewayError::MethodNotAllowed(_)
            | GatewayError::NotFound(_) => CacheStatus::Bypass,
            _ => CacheStatus::Miss,
        }
    }

    /// Message shown to the client. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<OriginError> for GatewayError {
    fn from(err: OriginError) -> Self {
        match err {
            OriginError::Timeout { endpoint, .. } => GatewayError::OriginTimeout { endpoint },
            OriginError::Unreachable { endpoint, .. } | OriginError::InvalidUrl { endpoint, .. } => {
                GatewayError::OriginUnreachable { endpoint }
            }
            OriginError::Status { endpoint, .. } | OriginError::InvalidPayload { endpoint, .. } => {
                GatewayError::OriginError { endpoint }
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "success": false,
            "error": self.public_message(),
        }));

        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        headers.insert(
            X_CACHE,
            HeaderValue::from_static(self.cache_status().as_str()),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}
