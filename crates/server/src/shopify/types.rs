//! Domain types returned by the Shopify client.
//!
//! These are flattened from the GraphQL response shapes in
//! [`super::queries`] so callers never deal with `nodes` or `shopMoney`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An order as read back from the Admin API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetail {
    /// Order GID.
    pub id: String,
    /// Display name, e.g. `#1001`.
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub currency_code: String,
    pub total_price: Decimal,
    pub shipping_price: Option<Decimal>,
    pub discounts: Option<Decimal>,
    pub customer: Option<OrderCustomer>,
    pub shipping_address: Option<Address>,
    pub line_items: Vec<OrderLineItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCustomer {
    /// Customer GID.
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Postal address shared by the GraphQL and webhook order shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

impl Address {
    /// Single-line address, skipping empty parts.
    #[must_use]
    pub fn one_line(&self) -> String {
        [
            &self.address1,
            &self.address2,
            &self.city,
            &self.province,
            &self.zip,
            &self.country,
        ]
        .into_iter()
        .filter_map(|part| part.as_deref())
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }

    /// Recipient name, if any part of it is present.
    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        join_name(self.first_name.as_deref(), self.last_name.as_deref())
    }
}

/// Join optional first/last names with a space.
#[must_use]
pub fn join_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let name = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!name.is_empty()).then_some(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLineItem {
    /// Line item GID.
    pub id: String,
    pub title: String,
    pub sku: Option<String>,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub product_id: Option<String>,
    pub product_handle: Option<String>,
    pub variant_id: Option<String>,
    pub image_url: Option<String>,
}

/// Fulfillment order status.
///
/// Only [`Open`](Self::Open) and [`InProgress`](Self::InProgress) orders
/// accept new fulfillments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentOrderStatus {
    Open,
    InProgress,
    Scheduled,
    OnHold,
    Incomplete,
    Cancelled,
    Closed,
    #[serde(other)]
    Unknown,
}

impl FulfillmentOrderStatus {
    /// Parse the GraphQL enum value. Unrecognized values map to `Unknown`.
    #[must_use]
    pub fn from_graphql(value: &str) -> Self {
        match value {
            "OPEN" => Self::Open,
            "IN_PROGRESS" => Self::InProgress,
            "SCHEDULED" => Self::Scheduled,
            "ON_HOLD" => Self::OnHold,
            "INCOMPLETE" => Self::Incomplete,
            "CANCELLED" => Self::Cancelled,
            "CLOSED" => Self::Closed,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn is_fulfillable(self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

/// A group of line items fulfilled together from one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentOrder {
    /// Fulfillment order GID.
    pub id: String,
    pub status: FulfillmentOrderStatus,
    pub line_items: Vec<FulfillmentOrderLineItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentOrderLineItem {
    /// Fulfillment order line item GID.
    pub id: String,
    pub total_quantity: i64,
    pub remaining_quantity: i64,
}

/// Input for one `fulfillmentCreate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentRequest {
    pub fulfillment_order_id: String,
    pub line_items: Vec<FulfillmentLineItem>,
    pub notify_customer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentLineItem {
    pub id: String,
    pub quantity: i64,
}

/// `OrderCancelReason` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Customer,
    Declined,
    Fraud,
    Inventory,
    Staff,
    Other,
}

impl CancelReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "CUSTOMER",
            Self::Declined => "DECLINED",
            Self::Fraud => "FRAUD",
            Self::Inventory => "INVENTORY",
            Self::Staff => "STAFF",
            Self::Other => "OTHER",
        }
    }
}

/// Options for `orderCancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOptions {
    pub reason: CancelReason,
    pub refund: bool,
    pub restock: bool,
    pub notify_customer: bool,
}

impl CancelOptions {
    /// Cancellation driven by a keyCRM status: put stock back, leave refunds
    /// to the CRM operator and keep the customer out of it.
    #[must_use]
    pub const fn from_crm() -> Self {
        Self {
            reason: CancelReason::Other,
            refund: false,
            restock: true,
            notify_customer: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fulfillable_statuses() {
        assert!(FulfillmentOrderStatus::Open.is_fulfillable());
        assert!(FulfillmentOrderStatus::InProgress.is_fulfillable());
        assert!(!FulfillmentOrderStatus::Closed.is_fulfillable());
        assert!(!FulfillmentOrderStatus::OnHold.is_fulfillable());
        assert_eq!(
            FulfillmentOrderStatus::from_graphql("SOMETHING_NEW"),
            FulfillmentOrderStatus::Unknown
        );
    }

    #[test]
    fn test_address_one_line_skips_blanks() {
        let address = Address {
            address1: Some("Khreshchatyk 1".to_string()),
            address2: Some("  ".to_string()),
            city: Some("Kyiv".to_string()),
            country: Some("Ukraine".to_string()),
            ..Address::default()
        };
        assert_eq!(address.one_line(), "Khreshchatyk 1, Kyiv, Ukraine");
    }

    #[test]
    fn test_join_name() {
        assert_eq!(join_name(Some("Olena"), Some("Koval")).as_deref(), Some("Olena Koval"));
        assert_eq!(join_name(None, Some("Koval")).as_deref(), Some("Koval"));
        assert_eq!(join_name(Some(""), None), None);
    }

    #[test]
    fn test_crm_cancel_options() {
        let options = CancelOptions::from_crm();
        assert!(options.restock);
        assert!(!options.refund);
        assert!(!options.notify_customer);
        assert_eq!(options.reason.as_str(), "OTHER");
    }
}
