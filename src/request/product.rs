use std::collections::BTreeSet;

use serde_json::Value;
use url::form_urlencoded;

use super::{normalize_shop, optional_text, parse_limit, required_text, segments};
use crate::cache::{CacheKey, KeyFields, key::compute_key};
use crate::error::{GatewayError, Result};
use crate::origin::{OriginMethod, OriginRequest};
use crate::policy::Endpoint;

const ORIGIN_PATH: &str = "/api/v2/recommendation/product";

/// `GET /api/v2/recommendation/product`
#[derive(Clone, Debug, PartialEq)]
pub struct ProductRecommendationRequest {
    pub shop: String,
    pub kind: String,
    pub product_id: Option<String>,
    pub product_handle: Option<String>,
    pub layout: Option<String>,
    pub cart_token: Option<String>,
    pub exclude_product_ids: BTreeSet<String>,
    pub limit: Option<u32>,
    /// Query pairs exactly as received, forwarded to the origin
    raw_query: Vec<(String, String)>,
}

impl ProductRecommendationRequest {
    pub fn from_query(query: Option<&str>) -> Result<Self> {
        let raw_query: Vec<(String, String)> = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
        // Last occurrence wins for repeated scalar params
        let param = |name: &str| {
            raw_query
                .iter()
                .rev()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };

        let shop = normalize_shop(param("shop"))?;
        let kind = required_text(param("type"), "type")?;
        let product_id = optional_text(param("productId"));
        let product_handle = optional_text(param("productHandle")).map(|h| h.to_ascii_lowercase());
        if product_id.is_none() && product_handle.is_none() {
            return Err(GatewayError::Validation(
                "Missing required field: productId or productHandle".to_string(),
            ));
        }

        let exclude_product_ids = raw_query
            .iter()
            .filter(|(k, _)| k == "excludeProductIds")
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            shop,
            kind,
            product_id,
            product_handle,
            layout: optional_text(param("layout")),
            cart_token: optional_text(param("cartToken")),
            exclude_product_ids,
            limit: parse_limit(param("limit"))?,
            raw_query,
        })
    }

    pub fn cache_key(&self) -> CacheKey {
        let fields = KeyFields::new()
            .field("shop", self.shop.as_str())
            .field("type", self.kind.as_str())
            .optional("productId", self.product_id.as_deref())
            .optional("productHandle", self.product_handle.as_deref())
            .optional("layout", self.layout.as_deref())
            .optional("cartToken", self.cart_token.as_deref())
            .unordered(
                "excludeProductIds",
                self.exclude_product_ids.iter().map(|id| Value::from(id.as_str())),
            )
            .optional("limit", self.limit);
        compute_key(Endpoint::ProductRecommendation.namespace(), &fields)
    }

    pub fn origin_request(&self) -> OriginRequest {
        OriginRequest {
            endpoint: Endpoint::ProductRecommendation,
            method: OriginMethod::Get,
            path: segments(ORIGIN_PATH),
            query: self.raw_query.clone(),
            body: None,
            shop: self.shop.clone(),
        }
    }
}
