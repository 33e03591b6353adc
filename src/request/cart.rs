use serde_json::Value;

use super::{
    limit_field, normalize_shop, optional_text, parse_object, required_text, segments, str_field,
};
use crate::cache::{CacheKey, KeyFields, key::compute_key};
use crate::error::{GatewayError, Result};
use crate::origin::{OriginMethod, OriginRequest};
use crate::policy::Endpoint;

const ORIGIN_PATH: &str = "/api/v2/recommendation/cart";

/// `POST /api/v2/recommendation/cart`
#[derive(Clone, Debug)]
pub struct CartRecommendationRequest {
    pub shop: String,
    pub kind: String,
    pub products: Vec<Value>,
    pub layout: Option<String>,
    pub limit: Option<u32>,
    body: Value,
}

impl CartRecommendationRequest {
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let object = parse_object(body)?;

        let shop = normalize_shop(str_field(&object, "shop")?)?;
        let kind = required_text(str_field(&object, "type")?, "type")?;
        let products = match object.get("products") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(GatewayError::Validation(
                    "Invalid field products: expected an array".to_string(),
                ));
            }
        };
        let layout = optional_text(str_field(&object, "layout")?);
        let limit = limit_field(&object)?;

        Ok(Self {
            shop,
            kind,
            products,
            layout,
            limit,
            body: Value::Object(object),
        })
    }

    pub fn cache_key(&self) -> CacheKey {
        let fields = KeyFields::new()
            .field("shop", self.shop.as_str())
            .field("type", self.kind.as_str())
            .unordered("products", self.products.iter().cloned())
            .optional("layout", self.layout.as_deref())
            .optional("limit", self.limit);
        compute_key(Endpoint::CartRecommendation.namespace(), &fields)
    }

    pub fn origin_request(&self) -> OriginRequest {
        OriginRequest {
            endpoint: Endpoint::CartRecommendation,
            method: OriginMethod::Post,
            path: segments(ORIGIN_PATH),
            query: Vec::new(),
            body: Some(self.body.clone()),
            shop: self.shop.clone(),
        }
    }
}
