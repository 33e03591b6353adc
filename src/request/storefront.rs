use serde_json::Value;

use super::{id_field, normalize_shop, optional_text, parse_object, segments, str_field};
use crate::cache::key::{compute_key, sorted_canonically};
use crate::cache::{CacheKey, KeyFields};
use crate::error::{GatewayError, Result};
use crate::origin::{OriginMethod, OriginRequest};
use crate::policy::Endpoint;

const ORIGIN_PATH: &str = "/api/storefront";

/// Cart arrays whose order is irrelevant to cart-rule evaluation.
const UNORDERED_CART_ARRAYS: [&str; 2] = ["items", "lines"];

/// `POST /api/storefront`
///
/// A request carrying `actionType` mutates the cart and must never be
/// cached or coalesced.
#[derive(Clone, Debug)]
pub struct StorefrontRequest {
    pub shop: String,
    pub cart: Value,
    pub action_type: Option<String>,
    pub variant_id: Option<String>,
    pub attribute: Option<Value>,
    body: Value,
}

impl StorefrontRequest {
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let object = parse_object(body)?;

        let cart = match object.get("cart") {
            None | Some(Value::Null) => {
                return Err(GatewayError::Validation(
                    "Missing required field: cart".to_string(),
                ));
            }
            Some(cart @ Value::Object(_)) => cart.clone(),
            Some(_) => {
                return Err(GatewayError::Validation(
                    "Invalid field cart: expected an object".to_string(),
                ));
            }
        };
        let shop = normalize_shop(str_field(&object, "shop")?)?;
        let action_type = optional_text(str_field(&object, "actionType")?);
        let variant_id = id_field(&object, "variantId")?;
        let attribute = object.get("attribute").filter(|v| !v.is_null()).cloned();

        Ok(Self {
            shop,
            cart,
            action_type,
            variant_id,
            attribute,
            body: Value::Object(object),
        })
    }

    /// Whether this request is a cart mutation.
    pub fn is_action(&self) -> bool {
        self.action_type.is_some()
    }

    pub fn cache_key(&self) -> CacheKey {
        let fields = KeyFields::new()
            .field("shop", self.shop.as_str())
            .field("cart", canonical_cart(&self.cart))
            .optional("variantId", self.variant_id.as_deref())
            .optional("attribute", self.attribute.clone());
        compute_key(Endpoint::Storefront.namespace(), &fields)
    }

    pub fn origin_request(&self) -> OriginRequest {
        OriginRequest {
            endpoint: Endpoint::Storefront,
            method: OriginMethod::Post,
            path: segments(ORIGIN_PATH),
            query: Vec::new(),
            body: Some(self.body.clone()),
            shop: self.shop.clone(),
        }
    }
}

/// Cart with its line collections sorted.
fn canonical_cart(cart: &Value) -> Value {
    let mut cart = cart.clone();
    if let Value::Object(map) = &mut cart {
        for field in UNORDERED_CART_ARRAYS {
            if let Some(Value::Array(lines)) = map.get_mut(field) {
                *lines = sorted_canonically(std::mem::take(lines));
            }
        }
    }
    cart
}
