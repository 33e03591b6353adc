use super::normalize_shop;
use crate::cache::{CacheKey, KeyFields, key::compute_key};
use crate::error::{GatewayError, Result};
use crate::origin::{OriginMethod, OriginRequest};
use crate::policy::Endpoint;

/// `GET /recommendations/handle/{shop}/{productHandle}`, proxied to the
/// "think" origin under the same path.
#[derive(Clone, Debug, PartialEq)]
pub struct HandleRecommendationRequest {
    pub shop: String,
    pub product_handle: String,
}

impl HandleRecommendationRequest {
    /// Parse the path segments following `/recommendations/handle/`.
    pub fn from_segments(rest: &str) -> Result<Self> {
        let mut parts = rest.split('/').map(str::trim);
        let shop = normalize_shop(parts.next())?;
        let product_handle = match parts.next() {
            Some(handle) if !handle.is_empty() => handle.to_ascii_lowercase(),
            _ => {
                return Err(GatewayError::Validation(
                    "Missing required field: productHandle".to_string(),
                ));
            }
        };
        if parts.any(|extra| !extra.is_empty()) {
            return Err(GatewayError::Validation(
                "Unexpected path segments after productHandle".to_string(),
            ));
        }

        Ok(Self {
            shop,
            product_handle,
        })
    }

    pub fn cache_key(&self) -> CacheKey {
        let fields = KeyFields::new()
            .field("shop", self.shop.as_str())
            .field("productHandle", self.product_handle.as_str());
        compute_key(Endpoint::HandleRecommendation.namespace(), &fields)
    }

    pub fn origin_request(&self) -> OriginRequest {
        OriginRequest {
            endpoint: Endpoint::HandleRecommendation,
            method: OriginMethod::Get,
            path: vec![
                "recommendations".to_string(),
                "handle".to_string(),
                self.shop.clone(),
                self.product_handle.clone(),
            ],
            query: Vec::new(),
            body: None,
            shop: self.shop.clone(),
        }
    }
}
