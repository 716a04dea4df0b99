//! eSputnik payloads and the order mapper.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use storelink_core::{EsputnikOrderStatus, ShopifyGid, ShopifyOrderId};

use crate::shopify::webhooks::OrderWebhook;
use crate::shopify::{Address, OrderDetail};

/// One order in a `POST /orders` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EsputnikOrder {
    pub external_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_customer_id: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_cost: Decimal,
    pub status: EsputnikOrderStatus,
    pub date: DateTime<Utc>,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub shipping: Option<Decimal>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub discount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    pub items: Vec<EsputnikOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EsputnikOrderItem {
    pub external_item_id: String,
    pub name: String,
    pub quantity: i64,
    /// Unit price.
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Custom event for `POST /event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EsputnikEvent {
    pub event_type_key: String,
    /// Contact key; we always key on email.
    pub key_value: String,
    pub params: Vec<EventParam>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventParam {
    pub name: String,
    pub value: String,
}

impl EventParam {
    pub fn new(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Where an order snapshot came from.
///
/// Webhooks deliver the REST shape; the status fanout reads the order back
/// through GraphQL. Both feed the same mapper.
#[derive(Debug, Clone, Copy)]
pub enum OrderSource<'a> {
    Webhook(&'a OrderWebhook),
    Admin(&'a OrderDetail),
}

impl EsputnikOrder {
    /// Build the eSputnik order for `status` from either order shape.
    #[must_use]
    pub fn from_source(source: OrderSource<'_>, status: EsputnikOrderStatus) -> Self {
        match source {
            OrderSource::Webhook(order) => Self::from_webhook(order, status),
            OrderSource::Admin(order) => Self::from_detail(order, status),
        }
    }

    fn from_webhook(order: &OrderWebhook, status: EsputnikOrderStatus) -> Self {
        let (first_name, last_name) = order.customer.as_ref().map_or_else(
            || names_from_address(order.shipping_address.as_ref()),
            |c| (c.first_name.clone(), c.last_name.clone()),
        );

        Self {
            external_order_id: order.id.to_string(),
            external_customer_id: order.customer.as_ref().map(|c| c.id.to_string()),
            total_cost: order.total_price,
            status,
            date: order.created_at,
            currency: order.currency.clone(),
            email: order.contact_email().map(str::to_string),
            phone: order.contact_phone().map(str::to_string),
            first_name,
            last_name,
            shipping: order.shipping_price(),
            discount: order.total_discounts.filter(|d| !d.is_zero()),
            delivery_address: delivery_address(order.shipping_address.as_ref()),
            items: order
                .line_items
                .iter()
                .map(|item| EsputnikOrderItem {
                    external_item_id: item
                        .variant_id
                        .or(item.product_id)
                        .unwrap_or(item.id)
                        .to_string(),
                    name: item.title.clone(),
                    quantity: item.quantity,
                    cost: item.price,
                    image_url: None,
                })
                .collect(),
        }
    }

    fn from_detail(order: &OrderDetail, status: EsputnikOrderStatus) -> Self {
        let (first_name, last_name) = order.customer.as_ref().map_or_else(
            || names_from_address(order.shipping_address.as_ref()),
            |c| (c.first_name.clone(), c.last_name.clone()),
        );
        let customer_email = order.customer.as_ref().and_then(|c| c.email.clone());
        let customer_phone = order.customer.as_ref().and_then(|c| c.phone.clone());

        Self {
            external_order_id: ShopifyOrderId::parse(&order.id)
                .map_or_else(|_| order.id.clone(), String::from),
            external_customer_id: order.customer.as_ref().map(|c| bare_id(&c.id)),
            total_cost: order.total_price,
            status,
            date: order.created_at,
            currency: order.currency_code.clone(),
            email: order.email.clone().or(customer_email),
            phone: order.phone.clone().or(customer_phone),
            first_name,
            last_name,
            shipping: order.shipping_price,
            discount: order.discounts.filter(|d| !d.is_zero()),
            delivery_address: delivery_address(order.shipping_address.as_ref()),
            items: order
                .line_items
                .iter()
                .map(|item| EsputnikOrderItem {
                    external_item_id: bare_id(
                        item.variant_id
                            .as_deref()
                            .or(item.product_id.as_deref())
                            .unwrap_or(&item.id),
                    ),
                    name: item.title.clone(),
                    quantity: item.quantity,
                    cost: item.unit_price,
                    image_url: item.image_url.clone(),
                })
                .collect(),
        }
    }
}

/// Numeric part of a GID, or the input unchanged if it is not one.
fn bare_id(id: &str) -> String {
    ShopifyGid::parse(id).map_or_else(|_| id.to_string(), |gid| gid.id().to_string())
}

fn names_from_address(address: Option<&Address>) -> (Option<String>, Option<String>) {
    address.map_or((None, None), |a| (a.first_name.clone(), a.last_name.clone()))
}

fn delivery_address(address: Option<&Address>) -> Option<String> {
    address
        .map(Address::one_line)
        .filter(|line| !line.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shopify::{OrderCustomer, OrderLineItem};

    fn detail() -> OrderDetail {
        OrderDetail {
            id: "gid://shopify/Order/5551234".to_string(),
            name: "#1001".to_string(),
            email: None,
            phone: None,
            created_at: "2025-03-01T10:00:00Z".parse().unwrap(),
            currency_code: "UAH".to_string(),
            total_price: Decimal::new(59_800, 2),
            shipping_price: Some(Decimal::new(5_000, 2)),
            discounts: Some(Decimal::ZERO),
            customer: Some(OrderCustomer {
                id: "gid://shopify/Customer/77".to_string(),
                first_name: Some("Olena".to_string()),
                last_name: Some("Koval".to_string()),
                email: Some("olena@shop.ua".to_string()),
                phone: None,
            }),
            shipping_address: Some(Address {
                city: Some("Kyiv".to_string()),
                address1: Some("Main 1".to_string()),
                ..Address::default()
            }),
            line_items: vec![OrderLineItem {
                id: "gid://shopify/LineItem/1".to_string(),
                title: "Tea".to_string(),
                sku: None,
                quantity: 2,
                unit_price: Decimal::new(27_400, 2),
                product_id: Some("gid://shopify/Product/5".to_string()),
                product_handle: Some("tea".to_string()),
                variant_id: Some("gid://shopify/ProductVariant/6".to_string()),
                image_url: Some("https://cdn.shopify.com/tea.jpg".to_string()),
            }],
        }
    }

    #[test]
    fn test_admin_source_uses_bare_ids() {
        let order =
            EsputnikOrder::from_source(OrderSource::Admin(&detail()), EsputnikOrderStatus::Initialized);

        assert_eq!(order.external_order_id, "5551234");
        assert_eq!(order.external_customer_id.as_deref(), Some("77"));
        assert_eq!(order.email.as_deref(), Some("olena@shop.ua"));
        assert_eq!(order.discount, None);
        assert_eq!(order.delivery_address.as_deref(), Some("Main 1, Kyiv"));
        assert_eq!(order.items[0].external_item_id, "6");
    }

    #[test]
    fn test_wire_format() {
        let order =
            EsputnikOrder::from_source(OrderSource::Admin(&detail()), EsputnikOrderStatus::Delivered);
        let json = serde_json::to_value(&order).unwrap();

        assert_eq!(json["status"], "DELIVERED");
        assert_eq!(json["externalOrderId"], "5551234");
        assert_eq!(json["totalCost"], 598.0);
        assert_eq!(json["shipping"], 50.0);
        assert_eq!(json["items"][0]["cost"], 274.0);
        assert!(json.get("phone").is_none());
    }

    #[test]
    fn test_webhook_source_matches_admin_ids() {
        let webhook: OrderWebhook = serde_json::from_value(serde_json::json!({
            "id": 5_551_234,
            "order_number": 1001,
            "name": "#1001",
            "created_at": "2025-03-01T10:00:00Z",
            "currency": "UAH",
            "total_price": "598.00",
            "shipping_address": { "first_name": "Olena", "city": "Kyiv" },
            "line_items": [{ "id": 1, "variant_id": 6, "title": "Tea", "quantity": 2, "price": "274.00" }]
        }))
        .unwrap();

        let order =
            EsputnikOrder::from_source(OrderSource::Webhook(&webhook), EsputnikOrderStatus::InProgress);
        assert_eq!(order.external_order_id, "5551234");
        assert_eq!(order.first_name.as_deref(), Some("Olena"));
        assert_eq!(order.items[0].external_item_id, "6");
        assert_eq!(order.external_customer_id, None);
    }
}
