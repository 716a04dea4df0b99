//! eSputnik marketing API client.
//!
//! # API Reference
//!
//! - Base URL: `https://esputnik.com/api/v1`
//! - Authentication: HTTP basic auth, any user name, API key as password
//! - `POST /orders` feeds order lifecycle automations
//! - `POST /event` triggers custom-event workflows (price alerts)

mod types;

pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::EsputnikConfig;

/// User name sent with basic auth; eSputnik only checks the password.
const AUTH_USER: &str = "storelink";

/// Errors that can occur when interacting with the eSputnik API.
#[derive(Debug, Error)]
pub enum EsputnikError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited by eSputnik.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Unauthorized (invalid API key).
    #[error("Unauthorized: invalid API key")]
    Unauthorized,
}

/// Marketing notifications about orders and subscriptions.
#[async_trait]
pub trait OrderEvents: Send + Sync {
    /// Upsert a batch of orders with their lifecycle status.
    async fn send_orders(&self, orders: &[EsputnikOrder]) -> Result<(), EsputnikError>;

    /// Fire a custom event for one contact.
    async fn send_event(&self, event: &EsputnikEvent) -> Result<(), EsputnikError>;
}

#[derive(Serialize)]
struct OrdersRequest<'a> {
    orders: &'a [EsputnikOrder],
}

/// eSputnik API client.
#[derive(Clone)]
pub struct EsputnikClient {
    inner: Arc<EsputnikClientInner>,
}

struct EsputnikClientInner {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl EsputnikClient {
    /// Create a new eSputnik API client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &EsputnikConfig) -> Result<Self, EsputnikError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            inner: Arc::new(EsputnikClientInner {
                client,
                base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
                api_key: config.api_key.clone(),
            }),
        })
    }

    /// POST a JSON body, discarding the response body.
    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<(), EsputnikError> {
        let url = format!("{}{path}", self.inner.base_url);
        let response = self
            .inner
            .client
            .post(&url)
            .basic_auth(AUTH_USER, Some(self.inner.api_key.expose_secret()))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(Self::parse_error(response).await)
    }

    async fn parse_error(response: reqwest::Response) -> EsputnikError {
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return EsputnikError::RateLimited(retry_after);
        }

        if status == 401 || status == 403 {
            return EsputnikError::Unauthorized;
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        EsputnikError::Api { status, message }
    }
}

#[async_trait]
impl OrderEvents for EsputnikClient {
    #[instrument(skip(self, orders), fields(count = orders.len()))]
    async fn send_orders(&self, orders: &[EsputnikOrder]) -> Result<(), EsputnikError> {
        self.post("/orders", &OrdersRequest { orders }).await?;
        debug!("Orders sent to eSputnik");
        Ok(())
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type_key))]
    async fn send_event(&self, event: &EsputnikEvent) -> Result<(), EsputnikError> {
        self.post("/event", event).await?;
        debug!("Event sent to eSputnik");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_orders_request_wraps_batch() {
        let json = serde_json::to_value(OrdersRequest { orders: &[] }).unwrap();
        assert_eq!(json, serde_json::json!({ "orders": [] }));
    }

    #[test]
    fn test_event_wire_format() {
        let event = EsputnikEvent {
            event_type_key: "price_drop".to_string(),
            key_value: "buyer@shop.ua".to_string(),
            params: vec![EventParam::new("newPrice", "199.00")],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventTypeKey"], "price_drop");
        assert_eq!(json["keyValue"], "buyer@shop.ua");
        assert_eq!(json["params"][0]["name"], "newPrice");
    }

    #[test]
    fn test_error_display() {
        let err = EsputnikError::Api {
            status: 400,
            message: "bad".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 400 - bad");
    }
}
