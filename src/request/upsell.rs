use serde_json::{Value, json};

use super::{id_field, id_value, normalize_shop, parse_object, required_text, segments, str_field};
use crate::cache::{CacheKey, KeyFields, key::compute_key};
use crate::error::{GatewayError, Result};
use crate::origin::{OriginMethod, OriginRequest};
use crate::policy::Endpoint;

const ORIGIN_PATH: &str = "/api/v2/funnel/upsell";

/// One product the funnel is matched against.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FunnelItem {
    pub product_id: String,
    pub variant_id: Option<String>,
}

/// `POST /api/v2/funnel/upsell`
#[derive(Clone, Debug)]
pub struct UpsellFunnelRequest {
    pub shop: String,
    pub kind: String,
    /// Sorted by (product id, variant id)
    pub items: Vec<FunnelItem>,
    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    body: Value,
}

impl UpsellFunnelRequest {
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let object = parse_object(body)?;

        let shop = normalize_shop(str_field(&object, "shop")?)?;
        let kind = required_text(str_field(&object, "type")?, "type")?;
        let mut items = match object.get("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(raw)) => raw.iter().map(parse_item).collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(GatewayError::Validation(
                    "Invalid field items: expected an array".to_string(),
                ));
            }
        };
        items.sort();
        let product_id = id_field(&object, "productId")?;
        let variant_id = id_field(&object, "variantId")?;

        if items.is_empty() && product_id.is_none() {
            return Err(GatewayError::Validation(
                "Missing required field: items or productId".to_string(),
            ));
        }

        Ok(Self {
            shop,
            kind,
            items,
            product_id,
            variant_id,
            body: Value::Object(object),
        })
    }

    pub fn cache_key(&self) -> CacheKey {
        let items = self
            .items
            .iter()
            .map(|item| json!({"productId": item.product_id, "variantId": item.variant_id}));
        let fields = KeyFields::new()
            .field("shop", self.shop.as_str())
            .field("type", self.kind.as_str())
            .unordered("items", items)
            .optional("productId", self.product_id.as_deref())
            .optional("variantId", self.variant_id.as_deref());
        compute_key(Endpoint::UpsellFunnel.namespace(), &fields)
    }

    pub fn origin_request(&self) -> OriginRequest {
        OriginRequest {
            endpoint: Endpoint::UpsellFunnel,
            method: OriginMethod::Post,
            path: segments(ORIGIN_PATH),
            query: Vec::new(),
            body: Some(self.body.clone()),
            shop: self.shop.clone(),
        }
    }
}

fn parse_item(raw: &Value) -> Result<FunnelItem> {
    let Value::Object(item) = raw else {
        return Err(GatewayError::Validation(
            "Invalid field items: expected objects with productId".to_string(),
        ));
    };
    let product_id = match item.get("productId") {
        Some(value) => id_value(value, "items.productId")?,
        None => None,
    }
    .ok_or_else(|| GatewayError::Validation("Missing required field: items.productId".to_string()))?;
    let variant_id = match item.get("variantId") {
        Some(value) => id_value(value, "items.variantId")?,
        None => None,
    };
    Ok(FunnelItem {
        product_id,
        variant_id,
    })
}
