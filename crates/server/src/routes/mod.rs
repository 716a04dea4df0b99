//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                              - Liveness
//! GET    /health/ready                        - Readiness (database)
//!
//! # keyCRM
//! POST   /webhooks/keycrm?token=              - Order status changes
//!
//! # Shopify (HMAC signed)
//! POST   /webhooks/shopify/orders-create      - Sync to keyCRM, INITIALIZED event
//! POST   /webhooks/shopify/orders-paid        - Sync to keyCRM, IN_PROGRESS event
//! POST   /webhooks/shopify/orders-cancelled   - Sync to keyCRM, CANCELLED event
//! POST   /webhooks/shopify/products-update    - Price tracking
//!
//! # Price alerts
//! POST   /api/price-subscriptions             - Subscribe
//! DELETE /api/price-subscriptions/{id}        - Unsubscribe
//! ```

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Router, routing::get};
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::state::AppState;

pub mod keycrm;
pub mod shopify;
pub mod subscriptions;

/// Every route, without middleware.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .merge(keycrm::router())
        .merge(shopify::router())
        .merge(subscriptions::router())
}

/// Liveness; does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness; 503 when the database is unreachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Parse a raw JSON body, mapping failures to 400.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("invalid JSON: {e}")))
}
