//! Shopify webhooks and health checks through the full router.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use storelink_core::EsputnikOrderStatus;
use storelink_integration_tests::{
    ORDER_NUMBER, SHOPIFY_ORDER_ID, order_payload, product_payload, read_json, shopify_request,
};
use storelink_server::shopify::webhooks::HMAC_HEADER;
use storelink_server::testing::TestApp;
use storelink_server::workers::{OrderSyncJob, PriceTrackingJob};
use tower::ServiceExt;

#[tokio::test]
async fn test_order_created_enqueues_sync_and_event() {
    let mut app = TestApp::new();

    let response = app
        .router()
        .oneshot(shopify_request("orders-create", &order_payload()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let sync = app.orders.drain();
    assert_eq!(sync.len(), 1);
    let OrderSyncJob::Created(order) = &sync[0].payload;
    assert_eq!(order.id, SHOPIFY_ORDER_ID);
    assert_eq!(order.order_number, ORDER_NUMBER);
    assert_eq!(sync[0].attempt, 0);

    let events = app.order_events.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload.status, EsputnikOrderStatus::Initialized);

    // Both jobs were stored before the 200
    let mut stored: Vec<_> = app.jobs.jobs().into_iter().map(|job| job.queue).collect();
    stored.sort();
    assert_eq!(stored, vec!["esputnik-orders", "shopify-orders"]);
    assert_eq!(app.jobs.jobs()[0].attempts, 0);
}

#[tokio::test]
async fn test_job_store_outage_fails_the_webhook() {
    let mut app = TestApp::new();
    app.jobs.fail_inserts();

    let response = app
        .router()
        .oneshot(shopify_request("orders-create", &order_payload()))
        .await
        .unwrap();

    // Shopify redelivers on a non-2xx
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.orders.drain().is_empty());
    assert!(app.order_events.drain().is_empty());
    assert!(app.jobs.jobs().is_empty());
}

#[tokio::test]
async fn test_paid_and_cancelled_map_to_lifecycle_statuses() {
    let mut app = TestApp::new();

    for topic in ["orders-paid", "orders-cancelled"] {
        let response = app
            .router()
            .oneshot(shopify_request(topic, &order_payload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{topic}");
    }

    let statuses: Vec<_> = app
        .order_events
        .drain()
        .into_iter()
        .map(|job| job.payload.status)
        .collect();
    assert_eq!(
        statuses,
        vec![EsputnikOrderStatus::InProgress, EsputnikOrderStatus::Cancelled]
    );
    // Each delivery also asks for a sync; the worker skips linked orders
    assert_eq!(app.orders.drain().len(), 2);
}

#[tokio::test]
async fn test_product_update_enqueues_price_tracking() {
    let mut app = TestApp::new();

    let response = app
        .router()
        .oneshot(shopify_request("products-update", &product_payload("299.00", 4)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let jobs = app.price_jobs.drain();
    assert_eq!(jobs.len(), 1);
    let PriceTrackingJob::ProductUpdated(product) = &jobs[0].payload;
    assert_eq!(product.variants.len(), 1);
    assert_eq!(product.variants[0].inventory_quantity, Some(4));
}

#[tokio::test]
async fn test_tampered_body_is_unauthorized() {
    let mut app = TestApp::new();
    let mut request = shopify_request("orders-create", &order_payload());
    // Keep the signature, change the body
    *request.body_mut() = Body::from(r#"{"id":1}"#);

    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.orders.drain().is_empty());
    assert!(app.order_events.drain().is_empty());
}

#[tokio::test]
async fn test_missing_signature_is_unauthorized() {
    let app = TestApp::new();
    let request = Request::post("/webhooks/shopify/orders-paid")
        .body(Body::from(order_payload().to_string()))
        .unwrap();

    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_but_malformed_payload_is_bad_request() {
    let app = TestApp::new();
    let body = serde_json::json!({ "id": "not-a-number" });

    let response = app
        .router()
        .oneshot(shopify_request("orders-create", &body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signature_header_name_is_case_insensitive() {
    let mut app = TestApp::new();
    let mut request = shopify_request("orders-create", &order_payload());
    let signature = request.headers_mut().remove(HMAC_HEADER).unwrap();
    request
        .headers_mut()
        .insert("x-shopify-hmac-sha256", signature);

    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.orders.drain().len(), 1);
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_liveness() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_readiness_without_database() {
    let app = TestApp::new();

    let (status, _) = read_json(
        app.router()
            .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
