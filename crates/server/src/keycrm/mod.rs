//! keyCRM OpenAPI client.
//!
//! # API Reference
//!
//! - Base URL: `https://openapi.keycrm.app/v1`
//! - Authentication: `Authorization: Bearer <api key>`
//! - Pushes Shopify orders into the CRM; status changes come back through
//!   the `/webhooks/keycrm` route

mod types;

pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use storelink_core::KeycrmOrderId;
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::KeycrmConfig;

/// Errors that can occur when interacting with the keyCRM API.
#[derive(Debug, Error)]
pub enum KeycrmError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited by keyCRM.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Request payload rejected (HTTP 422).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unauthorized (invalid API key).
    #[error("Unauthorized: invalid API key")]
    Unauthorized,
}

/// Order operations against the CRM.
#[async_trait]
pub trait CrmOrders: Send + Sync {
    /// Create an order, returning its keyCRM id.
    async fn create_order(&self, order: &NewCrmOrder) -> Result<KeycrmOrderId, KeycrmError>;

    /// Find an order by the `source_uuid` it was created with.
    async fn find_order_by_source_uuid(
        &self,
        source_uuid: &str,
    ) -> Result<Option<KeycrmOrderId>, KeycrmError>;
}

/// keyCRM API client.
#[derive(Clone)]
pub struct KeycrmClient {
    inner: Arc<KeycrmClientInner>,
}

struct KeycrmClientInner {
    client: reqwest::Client,
    base_url: String,
}

impl KeycrmClient {
    /// Create a new keyCRM API client.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is not a valid header value or the HTTP
    /// client fails to build.
    pub fn new(config: &KeycrmConfig) -> Result<Self, KeycrmError> {
        let mut headers = HeaderMap::new();

        let auth_value = format!("Bearer {}", config.api_key.expose_secret());
        let mut auth = HeaderValue::from_str(&auth_value)
            .map_err(|e| KeycrmError::Parse(format!("Invalid API key format: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            inner: Arc::new(KeycrmClientInner {
                client,
                base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
            }),
        })
    }

    /// Execute a POST request to the keyCRM API.
    async fn post<T: serde::de::DeserializeOwned, B: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, KeycrmError> {
        let url = format!("{}{path}", self.inner.base_url);
        let response = self.inner.client.post(&url).json(body).send().await?;
        Self::handle_response(response).await
    }

    /// Execute a GET request with query parameters.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, KeycrmError> {
        let url = self.url(path, query)?;
        let response = self.inner.client.get(url).send().await?;
        Self::handle_response(response).await
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<url::Url, KeycrmError> {
        let mut url = url::Url::parse(&format!("{}{path}", self.inner.base_url))
            .map_err(|e| KeycrmError::Parse(format!("Invalid URL: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, KeycrmError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| KeycrmError::Parse(format!("Failed to parse response: {e}")));
        }

        Err(Self::parse_error(response).await)
    }

    async fn parse_error(response: reqwest::Response) -> KeycrmError {
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return KeycrmError::RateLimited(retry_after);
        }

        if status == 401 || status == 403 {
            return KeycrmError::Unauthorized;
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        if status == 422 {
            return KeycrmError::Validation(message);
        }

        KeycrmError::Api { status, message }
    }
}

#[async_trait]
impl CrmOrders for KeycrmClient {
    #[instrument(skip(self, order), fields(source_uuid = %order.source_uuid))]
    async fn create_order(&self, order: &NewCrmOrder) -> Result<KeycrmOrderId, KeycrmError> {
        let created: CreatedOrder = self.post("/order", order).await?;
        info!(keycrm_order_id = %created.id, "Order created in keyCRM");
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn find_order_by_source_uuid(
        &self,
        source_uuid: &str,
    ) -> Result<Option<KeycrmOrderId>, KeycrmError> {
        let page: OrderPage = self
            .get(
                "/order",
                &[("filter[source_uuid]", source_uuid), ("limit", "1")],
            )
            .await?;
        Ok(page.data.first().map(|order| order.id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_new_trims_base_url() {
        let config = KeycrmConfig {
            api_key: SecretString::from("key"),
            base_url: url::Url::parse("https://openapi.keycrm.app/v1/").unwrap(),
            source_id: 1,
            webhook_token: None,
        };
        let client = KeycrmClient::new(&config).unwrap();
        assert_eq!(client.inner.base_url, "https://openapi.keycrm.app/v1");
    }

    #[test]
    fn test_new_rejects_header_breaking_key() {
        let config = KeycrmConfig {
            api_key: SecretString::from("bad\nkey"),
            base_url: url::Url::parse("https://openapi.keycrm.app/v1").unwrap(),
            source_id: 1,
            webhook_token: None,
        };
        assert!(matches!(
            KeycrmClient::new(&config),
            Err(KeycrmError::Parse(_))
        ));
    }

    #[test]
    fn test_source_uuid_lookup_url() {
        let config = KeycrmConfig {
            api_key: SecretString::from("key"),
            base_url: url::Url::parse("https://openapi.keycrm.app/v1").unwrap(),
            source_id: 1,
            webhook_token: None,
        };
        let client = KeycrmClient::new(&config).unwrap();

        let url = client
            .url("/order", &[("filter[source_uuid]", "5551234"), ("limit", "1")])
            .unwrap();

        assert_eq!(url.path(), "/v1/order");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("filter[source_uuid]".to_string(), "5551234".to_string()),
                ("limit".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_order_page_parses() {
        let page: OrderPage = serde_json::from_str(
            r#"{"total": 1, "current_page": 1, "per_page": 1, "data": [{"id": 88, "source_uuid": "5551234"}]}"#,
        )
        .unwrap();
        assert_eq!(page.data.first().map(|o| o.id), Some(KeycrmOrderId::new(88)));

        let empty: OrderPage = serde_json::from_str(r#"{"total": 0, "data": []}"#).unwrap();
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_created_order_parses_id() {
        let created: CreatedOrder =
            serde_json::from_str(r#"{"id": 4521, "source_uuid": "1", "status_id": 1}"#).unwrap();
        assert_eq!(created.id, KeycrmOrderId::new(4521));
    }
}
