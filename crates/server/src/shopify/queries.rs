//! GraphQL operations against the Shopify Admin API.
//!
//! Each operation is a unit struct implementing [`GraphQLQuery`] with a
//! sibling module holding its `Variables` and `ResponseData`, the same layout
//! `graphql_client` code generation produces.

use graphql_client::{GraphQLQuery, QueryBody};

/// Implements [`GraphQLQuery`] for an operation struct.
macro_rules! operation {
    ($name:ident, $module:ident, $document:expr) => {
        pub struct $name;

        impl GraphQLQuery for $name {
            type Variables = $module::Variables;
            type ResponseData = $module::ResponseData;

            fn build_query(variables: Self::Variables) -> QueryBody<Self::Variables> {
                QueryBody {
                    variables,
                    query: $document,
                    operation_name: stringify!($name),
                }
            }
        }
    };
}

operation!(GetOrderDetail, get_order_detail, GET_ORDER_DETAIL);
operation!(OrderMarkAsPaid, order_mark_as_paid, ORDER_MARK_AS_PAID);
operation!(GetFulfillmentOrders, get_fulfillment_orders, GET_FULFILLMENT_ORDERS);
operation!(FulfillmentCreate, fulfillment_create, FULFILLMENT_CREATE);
operation!(OrderClose, order_close, ORDER_CLOSE);
operation!(OrderCancel, order_cancel, ORDER_CANCEL);

const GET_ORDER_DETAIL: &str = r"
query GetOrderDetail($id: ID!) {
  order(id: $id) {
    id
    name
    email
    phone
    createdAt
    currencyCode
    totalPriceSet { shopMoney { amount currencyCode } }
    totalShippingPriceSet { shopMoney { amount currencyCode } }
    totalDiscountsSet { shopMoney { amount currencyCode } }
    customer { id firstName lastName email phone }
    shippingAddress {
      firstName lastName phone address1 address2 city province zip country
    }
    lineItems(first: 100) {
      nodes {
        id
        title
        sku
        quantity
        originalUnitPriceSet { shopMoney { amount currencyCode } }
        product { id handle }
        variant { id }
        image { url }
      }
    }
  }
}
";

const ORDER_MARK_AS_PAID: &str = r"
mutation OrderMarkAsPaid($input: OrderMarkAsPaidInput!) {
  orderMarkAsPaid(input: $input) {
    order { id displayFinancialStatus }
    userErrors { field message }
  }
}
";

const GET_FULFILLMENT_ORDERS: &str = r"
query GetFulfillmentOrders($orderId: ID!) {
  order(id: $orderId) {
    fulfillmentOrders(first: 50) {
      nodes {
        id
        status
        lineItems(first: 100) {
          nodes { id totalQuantity remainingQuantity }
        }
      }
    }
  }
}
";

const FULFILLMENT_CREATE: &str = r"
mutation FulfillmentCreate($fulfillment: FulfillmentInput!) {
  fulfillmentCreate(fulfillment: $fulfillment) {
    fulfillment { id status }
    userErrors { field message }
  }
}
";

const ORDER_CLOSE: &str = r"
mutation OrderClose($input: OrderCloseInput!) {
  orderClose(input: $input) {
    order { id closed }
    userErrors { field message }
  }
}
";

const ORDER_CANCEL: &str = r"
mutation OrderCancel(
  $orderId: ID!
  $reason: OrderCancelReason!
  $refund: Boolean!
  $restock: Boolean!
  $notifyCustomer: Boolean
) {
  orderCancel(
    orderId: $orderId
    reason: $reason
    refund: $refund
    restock: $restock
    notifyCustomer: $notifyCustomer
  ) {
    job { id done }
    orderCancelUserErrors { field message code }
  }
}
";

/// `{ field message }` selection shared by every mutation payload.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct UserError {
    pub field: Option<Vec<String>>,
    pub message: String,
}

/// `MoneyBag.shopMoney`.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyBag {
    pub shop_money: MoneyV2,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyV2 {
    pub amount: rust_decimal::Decimal,
    pub currency_code: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Node {
    pub id: String,
}

pub mod get_order_detail {
    use serde::{Deserialize, Serialize};

    use super::{MoneyBag, Node};

    #[derive(Debug, Serialize)]
    pub struct Variables {
        pub id: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct ResponseData {
        pub order: Option<Order>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Order {
        pub id: String,
        pub name: String,
        pub email: Option<String>,
        pub phone: Option<String>,
        pub created_at: chrono::DateTime<chrono::Utc>,
        pub currency_code: String,
        pub total_price_set: MoneyBag,
        pub total_shipping_price_set: Option<MoneyBag>,
        pub total_discounts_set: Option<MoneyBag>,
        pub customer: Option<Customer>,
        pub shipping_address: Option<MailingAddress>,
        pub line_items: LineItemConnection,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Customer {
        pub id: String,
        pub first_name: Option<String>,
        pub last_name: Option<String>,
        pub email: Option<String>,
        pub phone: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MailingAddress {
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

    #[derive(Debug, Deserialize)]
    pub struct LineItemConnection {
        pub nodes: Vec<LineItem>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LineItem {
        pub id: String,
        pub title: String,
        pub sku: Option<String>,
        pub quantity: i64,
        pub original_unit_price_set: MoneyBag,
        pub product: Option<Product>,
        pub variant: Option<Node>,
        pub image: Option<Image>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Product {
        pub id: String,
        pub handle: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct Image {
        pub url: String,
    }
}

pub mod order_mark_as_paid {
    use serde::{Deserialize, Serialize};

    use super::UserError;

    #[derive(Debug, Serialize)]
    pub struct Variables {
        pub input: OrderMarkAsPaidInput,
    }

    #[derive(Debug, Serialize)]
    pub struct OrderMarkAsPaidInput {
        pub id: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResponseData {
        pub order_mark_as_paid: Option<Payload>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Payload {
        pub user_errors: Vec<UserError>,
    }
}

pub mod get_fulfillment_orders {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Variables {
        pub order_id: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct ResponseData {
        pub order: Option<Order>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Order {
        pub fulfillment_orders: FulfillmentOrderConnection,
    }

    #[derive(Debug, Deserialize)]
    pub struct FulfillmentOrderConnection {
        pub nodes: Vec<FulfillmentOrder>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FulfillmentOrder {
        pub id: String,
        pub status: String,
        pub line_items: LineItemConnection,
    }

    #[derive(Debug, Deserialize)]
    pub struct LineItemConnection {
        pub nodes: Vec<LineItem>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LineItem {
        pub id: String,
        pub total_quantity: i64,
        pub remaining_quantity: i64,
    }
}

pub mod fulfillment_create {
    use serde::{Deserialize, Serialize};

    use super::UserError;

    #[derive(Debug, Serialize)]
    pub struct Variables {
        pub fulfillment: FulfillmentInput,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FulfillmentInput {
        pub line_items_by_fulfillment_order: Vec<FulfillmentOrderLineItemsInput>,
        pub notify_customer: bool,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FulfillmentOrderLineItemsInput {
        pub fulfillment_order_id: String,
        pub fulfillment_order_line_items: Vec<FulfillmentOrderLineItemInput>,
    }

    #[derive(Debug, Serialize)]
    pub struct FulfillmentOrderLineItemInput {
        pub id: String,
        pub quantity: i64,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResponseData {
        pub fulfillment_create: Option<Payload>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Payload {
        pub fulfillment: Option<Fulfillment>,
        pub user_errors: Vec<UserError>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Fulfillment {
        pub id: String,
    }
}

pub mod order_close {
    use serde::{Deserialize, Serialize};

    use super::UserError;

    #[derive(Debug, Serialize)]
    pub struct Variables {
        pub input: OrderCloseInput,
    }

    #[derive(Debug, Serialize)]
    pub struct OrderCloseInput {
        pub id: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResponseData {
        pub order_close: Option<Payload>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Payload {
        pub user_errors: Vec<UserError>,
    }
}

pub mod order_cancel {
    use serde::{Deserialize, Serialize};

    use super::UserError;

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Variables {
        pub order_id: String,
        pub reason: String,
        pub refund: bool,
        pub restock: bool,
        pub notify_customer: Option<bool>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResponseData {
        pub order_cancel: Option<Payload>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Payload {
        pub order_cancel_user_errors: Vec<UserError>,
    }
}
