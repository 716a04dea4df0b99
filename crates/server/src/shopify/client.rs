//! Shopify Admin GraphQL client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graphql_client::GraphQLQuery;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, de::DeserializeOwned};
use storelink_core::ShopifyGid;
use tracing::instrument;

use crate::config::ShopifyConfig;

use super::queries::{
    self, FulfillmentCreate, GetFulfillmentOrders, GetOrderDetail, OrderCancel, OrderClose,
    OrderMarkAsPaid, get_order_detail,
};
use super::{
    Address, CancelOptions, FulfillmentOrder, FulfillmentOrderLineItem, FulfillmentOrderStatus,
    FulfillmentRequest, GraphQLError, OrderCustomer, OrderDetail, OrderLineItem, ShopifyError,
    ShopifyOrders, check_user_errors,
};

/// Shopify Admin API GraphQL client.
///
/// Cheap to clone; the underlying `reqwest::Client` is shared.
#[derive(Clone)]
pub struct ShopifyClient {
    inner: Arc<ShopifyClientInner>,
}

struct ShopifyClientInner {
    client: reqwest::Client,
    endpoint: String,
    access_token: SecretString,
}

/// GraphQL response wrapper.
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLErrorResponse>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLErrorResponse {
    message: String,
    #[serde(default)]
    path: Vec<serde_json::Value>,
}

impl ShopifyClient {
    /// Create a new Admin API client.
    ///
    /// # Errors
    ///
    /// Returns `ShopifyError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ShopifyConfig) -> Result<Self, ShopifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            inner: Arc::new(ShopifyClientInner {
                client,
                endpoint: format!(
                    "https://{}/admin/api/{}/graphql.json",
                    config.store, config.api_version
                ),
                access_token: config.access_token.clone(),
            }),
        })
    }

    /// Execute a GraphQL query.
    async fn execute<Q: GraphQLQuery>(
        &self,
        variables: Q::Variables,
    ) -> Result<Q::ResponseData, ShopifyError>
    where
        Q::ResponseData: DeserializeOwned,
    {
        let body = Q::build_query(variables);

        let response = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .header(
                "X-Shopify-Access-Token",
                self.inner.access_token.expose_secret(),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        // Shopify sends fractional seconds, e.g. "2.0"
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok())
                .map_or(2, |secs| secs.ceil() as u64);
            return Err(ShopifyError::RateLimited(retry_after));
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ShopifyError::Unauthorized(
                "Invalid access token or missing scope".to_string(),
            ));
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ShopifyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let graphql_response: GraphQLResponse<Q::ResponseData> = response.json().await?;

        if let Some(errors) = graphql_response.errors
            && !errors.is_empty()
        {
            return Err(ShopifyError::GraphQL(
                errors
                    .into_iter()
                    .map(|e| GraphQLError {
                        message: e.message,
                        path: e.path,
                    })
                    .collect(),
            ));
        }

        graphql_response.data.ok_or_else(|| {
            ShopifyError::GraphQL(vec![GraphQLError {
                message: "No data in response".to_string(),
                path: vec![],
            }])
        })
    }
}

#[async_trait]
impl ShopifyOrders for ShopifyClient {
    #[instrument(skip(self), fields(order_id = %order))]
    async fn get_order_detail(&self, order: &ShopifyGid) -> Result<OrderDetail, ShopifyError> {
        let variables = get_order_detail::Variables {
            id: order.to_string(),
        };

        let response = self.execute::<GetOrderDetail>(variables).await?;

        response
            .order
            .map(convert_order_detail)
            .ok_or_else(|| ShopifyError::NotFound(order.to_string()))
    }

    #[instrument(skip(self), fields(order_id = %order))]
    async fn mark_order_as_paid(&self, order: &ShopifyGid) -> Result<(), ShopifyError> {
        let variables = queries::order_mark_as_paid::Variables {
            input: queries::order_mark_as_paid::OrderMarkAsPaidInput {
                id: order.to_string(),
            },
        };

        let response = self.execute::<OrderMarkAsPaid>(variables).await?;

        let payload = response
            .order_mark_as_paid
            .ok_or_else(|| ShopifyError::NotFound(order.to_string()))?;
        check_user_errors(&payload.user_errors)
    }

    #[instrument(skip(self), fields(order_id = %order))]
    async fn get_fulfillment_orders(
        &self,
        order: &ShopifyGid,
    ) -> Result<Vec<FulfillmentOrder>, ShopifyError> {
        let variables = queries::get_fulfillment_orders::Variables {
            order_id: order.to_string(),
        };

        let response = self.execute::<GetFulfillmentOrders>(variables).await?;

        let order_data = response
            .order
            .ok_or_else(|| ShopifyError::NotFound(order.to_string()))?;

        Ok(order_data
            .fulfillment_orders
            .nodes
            .into_iter()
            .map(|fo| FulfillmentOrder {
                id: fo.id,
                status: FulfillmentOrderStatus::from_graphql(&fo.status),
                line_items: fo
                    .line_items
                    .nodes
                    .into_iter()
                    .map(|li| FulfillmentOrderLineItem {
                        id: li.id,
                        total_quantity: li.total_quantity,
                        remaining_quantity: li.remaining_quantity,
                    })
                    .collect(),
            })
            .collect())
    }

    #[instrument(
        skip(self, request),
        fields(fulfillment_order_id = %request.fulfillment_order_id)
    )]
    async fn create_fulfillment(
        &self,
        request: &FulfillmentRequest,
    ) -> Result<String, ShopifyError> {
        use queries::fulfillment_create::{
            FulfillmentInput, FulfillmentOrderLineItemInput, FulfillmentOrderLineItemsInput,
            Variables,
        };

        let variables = Variables {
            fulfillment: FulfillmentInput {
                line_items_by_fulfillment_order: vec![FulfillmentOrderLineItemsInput {
                    fulfillment_order_id: request.fulfillment_order_id.clone(),
                    fulfillment_order_line_items: request
                        .line_items
                        .iter()
                        .map(|li| FulfillmentOrderLineItemInput {
                            id: li.id.clone(),
                            quantity: li.quantity,
                        })
                        .collect(),
                }],
                notify_customer: request.notify_customer,
            },
        };

        let response = self.execute::<FulfillmentCreate>(variables).await?;

        let payload = response.fulfillment_create.ok_or_else(|| {
            ShopifyError::UserError("No response from fulfillmentCreate".to_string())
        })?;
        check_user_errors(&payload.user_errors)?;

        payload
            .fulfillment
            .map(|f| f.id)
            .ok_or_else(|| ShopifyError::UserError("No fulfillment returned".to_string()))
    }

    #[instrument(skip(self), fields(order_id = %order))]
    async fn close_order(&self, order: &ShopifyGid) -> Result<(), ShopifyError> {
        let variables = queries::order_close::Variables {
            input: queries::order_close::OrderCloseInput {
                id: order.to_string(),
            },
        };

        let response = self.execute::<OrderClose>(variables).await?;

        let payload = response
            .order_close
            .ok_or_else(|| ShopifyError::NotFound(order.to_string()))?;
        check_user_errors(&payload.user_errors)
    }

    #[instrument(skip(self, options), fields(order_id = %order, reason = options.reason.as_str()))]
    async fn cancel_order(
        &self,
        order: &ShopifyGid,
        options: &CancelOptions,
    ) -> Result<(), ShopifyError> {
        let variables = queries::order_cancel::Variables {
            order_id: order.to_string(),
            reason: options.reason.as_str().to_string(),
            refund: options.refund,
            restock: options.restock,
            notify_customer: Some(options.notify_customer),
        };

        let response = self.execute::<OrderCancel>(variables).await?;

        let payload = response
            .order_cancel
            .ok_or_else(|| ShopifyError::NotFound(order.to_string()))?;
        check_user_errors(&payload.order_cancel_user_errors)
    }
}

fn convert_order_detail(order: get_order_detail::Order) -> OrderDetail {
    OrderDetail {
        id: order.id,
        name: order.name,
        email: order.email,
        phone: order.phone,
        created_at: order.created_at,
        currency_code: order.currency_code,
        total_price: order.total_price_set.shop_money.amount,
        shipping_price: order.total_shipping_price_set.map(|m| m.shop_money.amount),
        discounts: order.total_discounts_set.map(|m| m.shop_money.amount),
        customer: order.customer.map(|c| OrderCustomer {
            id: c.id,
            first_name: c.first_name,
            last_name: c.last_name,
            email: c.email,
            phone: c.phone,
        }),
        shipping_address: order.shipping_address.map(|a| Address {
            first_name: a.first_name,
            last_name: a.last_name,
            phone: a.phone,
            address1: a.address1,
            address2: a.address2,
            city: a.city,
            province: a.province,
            zip: a.zip,
            country: a.country,
        }),
        line_items: order
            .line_items
            .nodes
            .into_iter()
            .map(|li| OrderLineItem {
                id: li.id,
                title: li.title,
                sku: li.sku,
                quantity: li.quantity,
                unit_price: li.original_unit_price_set.shop_money.amount,
                product_id: li.product.as_ref().map(|p| p.id.clone()),
                product_handle: li.product.map(|p| p.handle),
                variant_id: li.variant.map(|v| v.id),
                image_url: li.image.map(|i| i.url),
            })
            .collect(),
    }
}
