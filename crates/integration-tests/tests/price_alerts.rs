//! Price alert subscriptions and product-update tracking.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use storelink_integration_tests::{json_request, product_payload, read_json, shopify_request};
use storelink_server::pricing::PriceTracker;
use storelink_server::queue::JobHandler;
use storelink_server::testing::TestApp;
use storelink_server::workers::PriceTrackingHandler;
use tower::ServiceExt;
use uuid::Uuid;

async fn subscribe(app: &TestApp, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    read_json(
        app.router()
            .oneshot(json_request("/api/price-subscriptions", &body))
            .await
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn test_create_subscription() {
    let app = TestApp::new();

    let (status, json) = subscribe(
        &app,
        json!({
            "email": "olena@example.ua",
            "product_id": 10,
            "variant_id": 21,
            "kind": "PRICE_DROP",
            "target_price": "250.00"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["kind"], "PRICE_DROP");
    assert_eq!(json["active"], true);
    assert_eq!(json["product_id"], 10);
    let id: Uuid = json["id"].as_str().unwrap().parse().unwrap();
    assert!(app.prices.subscription(id).is_some());
}

#[tokio::test]
async fn test_invalid_subscription_is_rejected() {
    let app = TestApp::new();

    let (status, _) = subscribe(
        &app,
        json!({ "email": "not-an-email", "product_id": 10, "kind": "ANY_CHANGE" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = subscribe(
        &app,
        json!({ "email": "olena@example.ua", "product_id": 10, "kind": "SOMETIMES" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unsubscribe() {
    let app = TestApp::new();
    let (_, json) = subscribe(
        &app,
        json!({ "email": "olena@example.ua", "product_id": 10, "kind": "BACK_IN_STOCK" }),
    )
    .await;
    let id: Uuid = json["id"].as_str().unwrap().parse().unwrap();

    let delete = |id: Uuid| {
        Request::delete(format!("/api/price-subscriptions/{id}"))
            .body(Body::empty())
            .unwrap()
    };

    let response = app.router().oneshot(delete(id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!app.prices.subscription(id).unwrap().active);

    let response = app.router().oneshot(delete(Uuid::new_v4())).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Webhook in, job out, handler run by hand.
async fn deliver_product_update(
    app: &mut TestApp,
    handler: &PriceTrackingHandler,
    price: &str,
    qty: i64,
) {
    let response = app
        .router()
        .oneshot(shopify_request("products-update", &product_payload(price, qty)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for job in app.price_jobs.drain() {
        handler.process(&job.payload).await.unwrap();
    }
}

#[tokio::test]
async fn test_price_drop_alert_end_to_end() {
    let mut app = TestApp::new();
    let handler = PriceTrackingHandler::new(PriceTracker::new(
        app.prices.clone(),
        app.events.clone(),
    ));
    let (_, json) = subscribe(
        &app,
        json!({
            "email": "olena@example.ua",
            "product_id": 10,
            "kind": "PRICE_DROP",
            "target_price": "260.00"
        }),
    )
    .await;
    let id: Uuid = json["id"].as_str().unwrap().parse().unwrap();

    // Baseline, then a drop that misses the target, then one that meets it
    deliver_product_update(&mut app, &handler, "299.00", 5).await;
    deliver_product_update(&mut app, &handler, "279.00", 5).await;
    assert!(app.events.events().is_empty());

    deliver_product_update(&mut app, &handler, "249.00", 5).await;

    let events = app.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type_key, "price_drop");
    assert_eq!(events[0].key_value, "olena@example.ua");
    assert!(!app.prices.subscription(id).unwrap().active);
    assert_eq!(app.prices.snapshots().len(), 3);

    // Spent; a further drop is silent
    deliver_product_update(&mut app, &handler, "199.00", 5).await;
    assert_eq!(app.events.events().len(), 1);
}

#[tokio::test]
async fn test_any_change_alert_stays_active() {
    let mut app = TestApp::new();
    let handler = PriceTrackingHandler::new(PriceTracker::new(
        app.prices.clone(),
        app.events.clone(),
    ));
    let (_, json) = subscribe(
        &app,
        json!({ "email": "olena@example.ua", "product_id": 10, "variant_id": 21, "kind": "ANY_CHANGE" }),
    )
    .await;
    let id: Uuid = json["id"].as_str().unwrap().parse().unwrap();

    deliver_product_update(&mut app, &handler, "299.00", 5).await;
    deliver_product_update(&mut app, &handler, "319.00", 5).await;
    deliver_product_update(&mut app, &handler, "289.00", 5).await;
    // Stock change only
    deliver_product_update(&mut app, &handler, "289.00", 0).await;

    let keys: Vec<_> = app
        .events
        .events()
        .into_iter()
        .map(|e| e.event_type_key)
        .collect();
    assert_eq!(keys, vec!["price_change", "price_change"]);
    assert!(app.prices.subscription(id).unwrap().active);
}
