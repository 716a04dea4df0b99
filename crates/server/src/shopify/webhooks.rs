//! Shopify webhook payloads and signature verification.
//!
//! Webhooks use the REST resource shape (numeric ids, decimal strings), not
//! the GraphQL one.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use storelink_core::{LocalOrderId, ProductId, ShopifyOrderId, VariantId};

use super::Address;

/// Header carrying the base64 HMAC-SHA256 of the raw request body.
pub const HMAC_HEADER: &str = "X-Shopify-Hmac-Sha256";

/// Errors from webhook signature verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("signature is not valid base64")]
    Encoding,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verify a Shopify webhook signature against the raw body.
///
/// # Errors
///
/// Returns [`SignatureError`] if the header is absent, undecodable, or does
/// not match the body.
pub fn verify_hmac(
    secret: &SecretString,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), SignatureError> {
    let signature = signature.ok_or(SignatureError::Missing)?;
    let provided = BASE64
        .decode(signature.trim())
        .map_err(|_| SignatureError::Encoding)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);

    // verify_slice compares in constant time
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

/// Compute the signature Shopify would send for `body`.
#[must_use]
pub fn sign(secret: &SecretString, body: &[u8]) -> String {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

/// `orders/create`, `orders/paid` and `orders/cancelled` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWebhook {
    pub id: u64,
    /// Shop-scoped sequential number, used as the local order id.
    pub order_number: i64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub currency: String,
    pub total_price: Decimal,
    #[serde(default)]
    pub total_discounts: Option<Decimal>,
    #[serde(default)]
    pub total_shipping_price_set: Option<WebhookMoneySet>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub customer: Option<WebhookCustomer>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub line_items: Vec<WebhookLineItem>,
}

impl OrderWebhook {
    #[must_use]
    pub fn shopify_order_id(&self) -> ShopifyOrderId {
        ShopifyOrderId::from(self.id)
    }

    #[must_use]
    pub const fn local_order_id(&self) -> LocalOrderId {
        LocalOrderId::new(self.order_number)
    }

    /// Contact email, falling back to the customer record.
    #[must_use]
    pub fn contact_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .filter(|e| !e.is_empty())
            .or_else(|| self.customer.as_ref().and_then(|c| c.email.as_deref()))
    }

    /// Contact phone, falling back to customer then shipping address.
    #[must_use]
    pub fn contact_phone(&self) -> Option<&str> {
        self.phone
            .as_deref()
            .filter(|p| !p.is_empty())
            .or_else(|| self.customer.as_ref().and_then(|c| c.phone.as_deref()))
            .or_else(|| {
                self.shipping_address
                    .as_ref()
                    .and_then(|a| a.phone.as_deref())
            })
    }

    #[must_use]
    pub fn shipping_price(&self) -> Option<Decimal> {
        self.total_shipping_price_set
            .as_ref()
            .map(|set| set.shop_money.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookMoneySet {
    pub shop_money: WebhookMoney,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookMoney {
    pub amount: Decimal,
    pub currency_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookCustomer {
    pub id: u64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookLineItem {
    pub id: u64,
    #[serde(default)]
    pub product_id: Option<u64>,
    #[serde(default)]
    pub variant_id: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub variant_title: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    pub quantity: i64,
    pub price: Decimal,
}

/// `products/update` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductWebhook {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub variants: Vec<VariantWebhook>,
}

impl ProductWebhook {
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        ProductId::new(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantWebhook {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub compare_at_price: Option<Decimal>,
    #[serde(default)]
    pub inventory_quantity: Option<i64>,
}

impl VariantWebhook {
    #[must_use]
    pub const fn variant_id(&self) -> VariantId {
        VariantId::new(self.id)
    }

    /// Untracked inventory counts as available.
    #[must_use]
    pub fn available(&self) -> bool {
        self.inventory_quantity.is_none_or(|qty| qty > 0)
    }
}
