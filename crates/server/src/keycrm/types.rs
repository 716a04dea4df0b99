//! keyCRM OpenAPI request/response types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use storelink_core::KeycrmOrderId;

use crate::shopify::join_name;
use crate::shopify::webhooks::OrderWebhook;

/// keyCRM expects `ordered_at` without a zone, in UTC.
const ORDERED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Body of `POST /order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCrmOrder {
    pub source_id: i64,
    /// Shopify order id, lets CRM operators trace the order back.
    pub source_uuid: String,
    pub ordered_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_comment: Option<String>,
    pub buyer: CrmBuyer,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<CrmShipping>,
    pub products: Vec<CrmProduct>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub discount_amount: Option<Decimal>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub shipping_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrmBuyer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrmShipping {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address_region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address_zip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_receive_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrmProduct {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub quantity: i64,
    pub name: String,
}

/// The part of the created order we read back.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedOrder {
    pub id: KeycrmOrderId,
}

/// One page of `GET /order`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderPage {
    pub data: Vec<CreatedOrder>,
}

impl NewCrmOrder {
    /// Build the CRM order for a freshly created Shopify order.
    #[must_use]
    pub fn from_webhook(order: &OrderWebhook, source_id: i64) -> Self {
        let customer_name = order
            .customer
            .as_ref()
            .and_then(|c| join_name(c.first_name.as_deref(), c.last_name.as_deref()));

        let shipping = order.shipping_address.as_ref().map(|address| CrmShipping {
            shipping_address_city: address.city.clone(),
            shipping_address_country: address.country.clone(),
            shipping_address_region: address.province.clone(),
            shipping_address_zip: address.zip.clone(),
            shipping_receive_point: Some(
                [address.address1.as_deref(), address.address2.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(", "),
            )
            .filter(|point| !point.is_empty()),
            recipient_full_name: address.full_name(),
            recipient_phone: address.phone.clone(),
        });

        let products = order
            .line_items
            .iter()
            .map(|item| CrmProduct {
                sku: item.sku.clone().filter(|sku| !sku.is_empty()),
                price: item.price,
                quantity: item.quantity,
                name: item.variant_title.as_deref().map_or_else(
                    || item.title.clone(),
                    |variant| format!("{} ({variant})", item.title),
                ),
            })
            .collect();

        Self {
            source_id,
            source_uuid: order.id.to_string(),
            ordered_at: order
                .created_at
                .naive_utc()
                .format(ORDERED_AT_FORMAT)
                .to_string(),
            buyer_comment: order.note.clone().filter(|note| !note.is_empty()),
            buyer: CrmBuyer {
                full_name: customer_name,
                email: order.contact_email().map(str::to_string),
                phone: order.contact_phone().map(str::to_string),
            },
            shipping,
            products,
            discount_amount: order.total_discounts.filter(|d| !d.is_zero()),
            shipping_price: order.shipping_price(),
        }
    }
}
