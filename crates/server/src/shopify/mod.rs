//! Shopify Admin API access.
//!
//! # Architecture
//!
//! - [`ShopifyOrders`] is the seam the fanout engine talks to; the
//!   production implementation is [`ShopifyClient`]
//! - Operations are typed `graphql_client` queries with embedded documents
//!   ([`queries`])
//! - Authentication is the static Admin API access token of a custom app
//! - Webhook payloads and their HMAC check live in [`webhooks`]

mod client;
pub mod queries;
pub mod types;
pub mod webhooks;

use async_trait::async_trait;
use storelink_core::ShopifyGid;
use thiserror::Error;

pub use client::ShopifyClient;
pub use types::*;

/// Errors that can occur when interacting with the Shopify Admin API.
#[derive(Debug, Error)]
pub enum ShopifyError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GraphQL query returned errors.
    #[error("GraphQL errors: {}", format_graphql_errors(.0))]
    GraphQL(Vec<GraphQLError>),

    /// Non-success HTTP status other than 401/403/429.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by Shopify.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Authentication/authorization failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// User error from mutation (e.g., invalid input).
    #[error("User error: {0}")]
    UserError(String),
}

/// A GraphQL error returned by the Shopify Admin API.
#[derive(Debug, Clone)]
pub struct GraphQLError {
    pub message: String,
    /// Path to the error in the response.
    pub path: Vec<serde_json::Value>,
}

fn format_graphql_errors(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.clone())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Turn a mutation's user-error list into a result.
///
/// # Errors
///
/// Returns `ShopifyError::UserError` with every `field: message` pair joined
/// by `; ` if the list is non-empty.
pub fn check_user_errors(errors: &[queries::UserError]) -> Result<(), ShopifyError> {
    if errors.is_empty() {
        return Ok(());
    }
    let message = errors
        .iter()
        .map(|e| {
            let field = e.field.as_ref().map(|f| f.join(".")).unwrap_or_default();
            format!("{field}: {}", e.message)
        })
        .collect::<Vec<_>>()
        .join("; ");
    Err(ShopifyError::UserError(message))
}

/// Order operations the status fanout needs from Shopify.
#[async_trait]
pub trait ShopifyOrders: Send + Sync {
    /// Read an order with line items, totals and shipping address.
    async fn get_order_detail(&self, order: &ShopifyGid) -> Result<OrderDetail, ShopifyError>;

    async fn mark_order_as_paid(&self, order: &ShopifyGid) -> Result<(), ShopifyError>;

    /// All fulfillment orders of an order, in any status.
    async fn get_fulfillment_orders(
        &self,
        order: &ShopifyGid,
    ) -> Result<Vec<FulfillmentOrder>, ShopifyError>;

    /// Create one fulfillment. Returns the fulfillment GID.
    async fn create_fulfillment(
        &self,
        request: &FulfillmentRequest,
    ) -> Result<String, ShopifyError>;

    async fn close_order(&self, order: &ShopifyGid) -> Result<(), ShopifyError>;

    async fn cancel_order(
        &self,
        order: &ShopifyGid,
        options: &CancelOptions,
    ) -> Result<(), ShopifyError>;
}
