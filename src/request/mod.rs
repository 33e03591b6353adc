//! Inbound request validation and canonicalisation.
//!
//! Each endpoint parses its raw input into a validated request type that
//! knows its cache key and how to forward itself to the origin. Nothing
//! unvalidated ever reaches the key generator.

mod cart;
mod handle;
mod product;
mod storefront;
mod upsell;

pub use cart::CartRecommendationRequest;
pub use handle::HandleRecommendationRequest;
pub use product::ProductRecommendationRequest;
pub use storefront::StorefrontRequest;
pub use upsell::UpsellFunnelRequest;

use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};

fn missing(field: &str) -> GatewayError {
    GatewayError::Validation(format!("Missing required field: {field}"))
}

fn invalid(field: &str, expected: &str) -> GatewayError {
    GatewayError::Validation(format!("Invalid field {field}: expected {expected}"))
}

/// Parse a JSON object body.
fn parse_object(body: &[u8]) -> Result<Map<String, Value>> {
    if body.is_empty() {
        return Err(GatewayError::Validation("Request body is required".to_string()));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(GatewayError::Validation(
            "Request body must be a JSON object".to_string(),
        )),
        Err(e) => Err(GatewayError::Validation(format!("Invalid JSON body: {e}"))),
    }
}

/// Trimmed shop domain, lower-cased. Empty counts as missing.
fn normalize_shop(raw: Option<&str>) -> Result<String> {
    match raw.map(str::trim) {
        Some(shop) if !shop.is_empty() => Ok(shop.to_ascii_lowercase()),
        _ => Err(missing("shop")),
    }
}

/// Trimmed non-empty string, `None` when absent, null or blank.
fn optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_text(raw: Option<&str>, field: &str) -> Result<String> {
    optional_text(raw).ok_or_else(|| missing(field))
}

/// String field of a JSON object; non-string values are rejected.
fn str_field<'a>(body: &'a Map<String, Value>, field: &str) -> Result<Option<&'a str>> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(invalid(field, "a string")),
    }
}

/// Identifier submitted as a JSON string or number, normalized to a string.
fn id_value(value: &Value, field: &str) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(optional_text(Some(s))),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(invalid(field, "a string or number id")),
    }
}

fn id_field(body: &Map<String, Value>, field: &str) -> Result<Option<String>> {
    body.get(field)
        .map_or(Ok(None), |value| id_value(value, field))
}

/// Positive integer limit, accepted as a number or numeric string.
fn parse_limit(raw: Option<&str>) -> Result<Option<u32>> {
    match optional_text(raw) {
        None => Ok(None),
        Some(text) => match text.parse::<u32>() {
            Ok(limit) if limit > 0 => Ok(Some(limit)),
            _ => Err(invalid("limit", "a positive integer")),
        },
    }
}

fn limit_field(body: &Map<String, Value>) -> Result<Option<u32>> {
    match body.get("limit") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(limit) if limit > 0 && limit <= u64::from(u32::MAX) => Ok(Some(limit as u32)),
            _ => Err(invalid("limit", "a positive integer")),
        },
        Some(Value::String(s)) => parse_limit(Some(s)),
        Some(_) => Err(invalid("limit", "a positive integer")),
    }
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
