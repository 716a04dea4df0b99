//! Shopify webhooks.
//!
//! Every payload is HMAC-verified and turned into queued jobs. Handlers only
//! enqueue, so Shopify gets its 200 without waiting on keyCRM or eSputnik.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use serde::de::DeserializeOwned;
use storelink_core::EsputnikOrderStatus;
use tracing::{info, instrument};

use super::parse_json;
use crate::error::AppError;
use crate::shopify::webhooks::{HMAC_HEADER, OrderWebhook, ProductWebhook, verify_hmac};
use crate::state::AppState;
use crate::workers::{OrderEventJob, OrderSyncJob, PriceTrackingJob};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/shopify/orders-create", post(orders_create))
        .route("/webhooks/shopify/orders-paid", post(orders_paid))
        .route("/webhooks/shopify/orders-cancelled", post(orders_cancelled))
        .route("/webhooks/shopify/products-update", post(products_update))
}

/// Verify the signature, then parse.
fn verified<T: DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<T, AppError> {
    let signature = headers.get(HMAC_HEADER).and_then(|v| v.to_str().ok());
    verify_hmac(&state.secrets().shopify, body, signature)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;
    parse_json(body)
}

/// Queue the keyCRM sync and the eSputnik event for an order.
///
/// Both jobs are stored before Shopify gets its 200. The sync is a no-op
/// for orders that are already linked.
async fn enqueue_order(
    state: &AppState,
    order: OrderWebhook,
    status: EsputnikOrderStatus,
) -> Result<(), AppError> {
    let queues = state.queues();
    let (sync, event) = tokio::join!(
        queues.orders.enqueue(OrderSyncJob::Created(order.clone())),
        queues.order_events.enqueue(OrderEventJob { status, order }),
    );
    let sync_id = sync?;
    let event_id = event?;
    info!(%sync_id, %event_id, %status, "Order jobs enqueued");
    Ok(())
}

#[instrument(skip_all)]
async fn orders_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let order: OrderWebhook = verified(&state, &headers, &body)?;
    enqueue_order(&state, order, EsputnikOrderStatus::Initialized).await?;
    Ok(StatusCode::OK)
}

#[instrument(skip_all)]
async fn orders_paid(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let order: OrderWebhook = verified(&state, &headers, &body)?;
    enqueue_order(&state, order, EsputnikOrderStatus::InProgress).await?;
    Ok(StatusCode::OK)
}

#[instrument(skip_all)]
async fn orders_cancelled(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let order: OrderWebhook = verified(&state, &headers, &body)?;
    enqueue_order(&state, order, EsputnikOrderStatus::Cancelled).await?;
    Ok(StatusCode::OK)
}

#[instrument(skip_all)]
async fn products_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let product: ProductWebhook = verified(&state, &headers, &body)?;
    let product_id = product.id;
    let job_id = state
        .queues()
        .prices
        .enqueue(PriceTrackingJob::ProductUpdated(product))
        .await?;
    info!(%job_id, product_id, "Price tracking job enqueued");
    Ok(StatusCode::OK)
}
