//! Integration tests for storelink.
//!
//! The tests drive the real router and job handlers against the in-memory
//! stores and recording clients from `storelink_server::testing`. No
//! database or network access is needed.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p storelink-integration-tests
//! ```
//!
//! This library holds shared fixtures: webhook payloads and request
//! builders.

use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode};
use secrecy::SecretString;
use serde_json::{Value, json};
use storelink_server::shopify::webhooks::{HMAC_HEADER, sign};
use storelink_server::testing::{KEYCRM_WEBHOOK_TOKEN, SHOPIFY_WEBHOOK_SECRET};

/// Shopify order id used by the fixtures.
pub const SHOPIFY_ORDER_ID: u64 = 5_551_234;
/// Shop order number, doubling as the local order id.
pub const ORDER_NUMBER: i64 = 1042;

/// An `orders/create` payload as Shopify sends it.
#[must_use]
pub fn order_payload() -> Value {
    json!({
        "id": SHOPIFY_ORDER_ID,
        "order_number": ORDER_NUMBER,
        "name": "#1042",
        "email": "olena@example.ua",
        "phone": null,
        "created_at": "2026-03-01T10:15:00+02:00",
        "currency": "UAH",
        "total_price": "648.00",
        "total_discounts": "0.00",
        "total_shipping_price_set": {
            "shop_money": { "amount": "50.00", "currency_code": "UAH" }
        },
        "note": "Call before delivery",
        "customer": {
            "id": 901,
            "first_name": "Olena",
            "last_name": "Koval",
            "email": "olena@example.ua",
            "phone": "+380501234567"
        },
        "shipping_address": {
            "first_name": "Olena",
            "last_name": "Koval",
            "phone": "+380501234567",
            "address1": "Khreshchatyk 1",
            "city": "Kyiv",
            "zip": "01001",
            "country": "Ukraine"
        },
        "line_items": [
            {
                "id": 11,
                "product_id": 10,
                "variant_id": 21,
                "title": "Sencha",
                "variant_title": "100 g",
                "sku": "TEA-SEN-100",
                "quantity": 2,
                "price": "299.00"
            }
        ]
    })
}

/// A `products/update` payload with one variant.
#[must_use]
pub fn product_payload(price: &str, inventory_quantity: i64) -> Value {
    json!({
        "id": 10,
        "title": "Sencha",
        "handle": "sencha",
        "variants": [
            {
                "id": 21,
                "title": "100 g",
                "price": price,
                "compare_at_price": null,
                "inventory_quantity": inventory_quantity
            }
        ]
    })
}

/// A keyCRM status change webhook body.
#[must_use]
pub fn status_change(keycrm_order_id: i64, status_id: i32) -> Value {
    json!({
        "event": "order.change_order_status",
        "context": {
            "id": keycrm_order_id,
            "status_id": status_id,
            "source_uuid": SHOPIFY_ORDER_ID.to_string()
        }
    })
}

/// POST a signed Shopify webhook.
#[must_use]
pub fn shopify_request(topic: &str, body: &Value) -> Request<Body> {
    let bytes = body.to_string().into_bytes();
    let signature = sign(&SecretString::from(SHOPIFY_WEBHOOK_SECRET), &bytes);
    Request::post(format!("/webhooks/shopify/{topic}"))
        .header("content-type", "application/json")
        .header(HMAC_HEADER, signature)
        .body(Body::from(bytes))
        .unwrap_or_default()
}

/// POST a keyCRM webhook with the configured token.
#[must_use]
pub fn keycrm_request(body: &Value) -> Request<Body> {
    keycrm_request_with_token(body, Some(KEYCRM_WEBHOOK_TOKEN))
}

#[must_use]
pub fn keycrm_request_with_token(body: &Value, token: Option<&str>) -> Request<Body> {
    let uri = token.map_or_else(
        || "/webhooks/keycrm".to_string(),
        |t| format!("/webhooks/keycrm?token={t}"),
    );
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}

/// POST a JSON body to `uri`.
#[must_use]
pub fn json_request(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}

/// Status and parsed JSON body (`Value::Null` for empty or non-JSON bodies).
pub async fn read_json(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}
