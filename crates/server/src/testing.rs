//! In-memory stores and recording clients for tests.
//!
//! Enabled for this crate's unit tests and, through the `test-support`
//! feature, for the integration test crate.

#![allow(clippy::missing_panics_doc)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use storelink_core::{
    KeycrmOrderId, LocalOrderId, ProductId, ShopifyAction, ShopifyGid, ShopifyOrderId, VariantId,
};
use uuid::Uuid;

use crate::db::{
    FailedJob, FailedJobStore, JobStore, MappingError, NewPriceSnapshot, NewPriceSubscription,
    OrderMapping, OrderMappingStore, PriceSnapshot, PriceStore, PriceSubscription,
    RepositoryError, StoredJob,
};
use crate::esputnik::{EsputnikError, EsputnikEvent, EsputnikOrder, OrderEvents};
use crate::fanout::FanoutEngine;
use crate::keycrm::{CrmOrders, KeycrmError, NewCrmOrder};
use crate::queue::{self, JobOptions, JobReceiver};
use crate::routes;
use crate::shopify::{
    CancelOptions, FulfillmentOrder, FulfillmentRequest, OrderDetail, ShopifyError, ShopifyOrders,
};
use crate::state::{AppState, Queues, WebhookSecrets};
use crate::workers::{OrderEventJob, OrderSyncJob, PriceTrackingJob};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Mapping store
// =============================================================================

#[derive(Default)]
pub struct InMemoryOrderMappingStore {
    rows: Mutex<Vec<OrderMapping>>,
    fail_next_attach: AtomicBool,
}

impl InMemoryOrderMappingStore {
    #[must_use]
    pub fn all(&self) -> Vec<OrderMapping> {
        lock(&self.rows).clone()
    }

    /// Make the next `attach_keycrm_id` fail as if the pool timed out.
    pub fn fail_next_attach(&self) {
        self.fail_next_attach.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderMappingStore for InMemoryOrderMappingStore {
    async fn create(
        &self,
        local_order_id: LocalOrderId,
        shopify_order_id: &ShopifyOrderId,
    ) -> Result<OrderMapping, MappingError> {
        let mut rows = lock(&self.rows);
        if rows.iter().any(|m| {
            m.local_order_id == local_order_id || &m.shopify_order_id == shopify_order_id
        }) {
            return Err(MappingError::DuplicateMapping(local_order_id));
        }
        let now = Utc::now();
        let mapping = OrderMapping {
            local_order_id,
            shopify_order_id: shopify_order_id.clone(),
            keycrm_order_id: None,
            created_at: now,
            updated_at: now,
        };
        rows.push(mapping.clone());
        Ok(mapping)
    }

    async fn attach_keycrm_id(
        &self,
        local_order_id: LocalOrderId,
        keycrm_order_id: KeycrmOrderId,
    ) -> Result<OrderMapping, MappingError> {
        if self.fail_next_attach.swap(false, Ordering::SeqCst) {
            return Err(MappingError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut rows = lock(&self.rows);
        if rows.iter().any(|m| {
            m.keycrm_order_id == Some(keycrm_order_id) && m.local_order_id != local_order_id
        }) {
            return Err(MappingError::KeycrmIdTaken(keycrm_order_id));
        }
        let mapping = rows
            .iter_mut()
            .find(|m| m.local_order_id == local_order_id)
            .ok_or(MappingError::MappingNotFound(local_order_id))?;

        match mapping.keycrm_order_id {
            Some(existing) if existing != keycrm_order_id => Err(MappingError::AlreadyAttached {
                local_order_id,
                existing,
            }),
            _ => {
                mapping.keycrm_order_id = Some(keycrm_order_id);
                mapping.updated_at = Utc::now();
                Ok(mapping.clone())
            }
        }
    }

    async fn find_by_keycrm_id(
        &self,
        keycrm_order_id: KeycrmOrderId,
    ) -> Result<Option<OrderMapping>, MappingError> {
        Ok(lock(&self.rows)
            .iter()
            .find(|m| m.keycrm_order_id == Some(keycrm_order_id))
            .cloned())
    }

    async fn find_by_local_id(
        &self,
        local_order_id: LocalOrderId,
    ) -> Result<Option<OrderMapping>, MappingError> {
        Ok(lock(&self.rows)
            .iter()
            .find(|m| m.local_order_id == local_order_id)
            .cloned())
    }

    async fn find_by_shopify_id(
        &self,
        shopify_order_id: &ShopifyOrderId,
    ) -> Result<Option<OrderMapping>, MappingError> {
        Ok(lock(&self.rows)
            .iter()
            .find(|m| &m.shopify_order_id == shopify_order_id)
            .cloned())
    }
}

// =============================================================================
// Shopify
// =============================================================================

/// A call made against [`RecordingShopify`]. Orders are recorded as GIDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShopifyCall {
    GetOrderDetail(String),
    MarkPaid(String),
    GetFulfillmentOrders(String),
    CreateFulfillment(FulfillmentRequest),
    Close(String),
    Cancel(String, CancelOptions),
}

/// Records every call and succeeds unless told otherwise.
#[derive(Default)]
pub struct RecordingShopify {
    calls: Mutex<Vec<ShopifyCall>>,
    fulfillment_orders: Mutex<Vec<FulfillmentOrder>>,
    failing: Mutex<HashSet<ShopifyAction>>,
    fail_order_detail: Mutex<bool>,
}

impl RecordingShopify {
    #[must_use]
    pub fn calls(&self) -> Vec<ShopifyCall> {
        lock(&self.calls).clone()
    }

    pub fn set_fulfillment_orders(&self, orders: Vec<FulfillmentOrder>) {
        *lock(&self.fulfillment_orders) = orders;
    }

    /// Make every call belonging to `action` fail.
    pub fn fail_action(&self, action: ShopifyAction) {
        lock(&self.failing).insert(action);
    }

    pub fn fail_order_detail(&self) {
        *lock(&self.fail_order_detail) = true;
    }

    fn record(&self, call: ShopifyCall) {
        lock(&self.calls).push(call);
    }

    fn check(&self, action: ShopifyAction) -> Result<(), ShopifyError> {
        if lock(&self.failing).contains(&action) {
            return Err(ShopifyError::UserError(format!("{action}: rejected")));
        }
        Ok(())
    }

    /// Order detail with one line item, shaped like a real response.
    #[must_use]
    pub fn order_detail(order: &ShopifyGid) -> OrderDetail {
        OrderDetail {
            id: order.to_string(),
            name: format!("#{}", order.id()),
            email: Some("buyer@example.ua".to_string()),
            phone: None,
            created_at: Utc::now(),
            currency_code: "UAH".to_string(),
            total_price: Decimal::new(59_800, 2),
            shipping_price: None,
            discounts: None,
            customer: None,
            shipping_address: None,
            line_items: vec![crate::shopify::OrderLineItem {
                id: "gid://shopify/LineItem/1".to_string(),
                title: "Tea".to_string(),
                sku: Some("TEA-1".to_string()),
                quantity: 2,
                unit_price: Decimal::new(29_900, 2),
                product_id: Some("gid://shopify/Product/5".to_string()),
                product_handle: Some("tea".to_string()),
                variant_id: Some("gid://shopify/ProductVariant/6".to_string()),
                image_url: None,
            }],
        }
    }
}

#[async_trait]
impl ShopifyOrders for RecordingShopify {
    async fn get_order_detail(&self, order: &ShopifyGid) -> Result<OrderDetail, ShopifyError> {
        self.record(ShopifyCall::GetOrderDetail(order.to_string()));
        if *lock(&self.fail_order_detail) {
            return Err(ShopifyError::NotFound(order.to_string()));
        }
        Ok(Self::order_detail(order))
    }

    async fn mark_order_as_paid(&self, order: &ShopifyGid) -> Result<(), ShopifyError> {
        self.record(ShopifyCall::MarkPaid(order.to_string()));
        self.check(ShopifyAction::MarkPaid)
    }

    async fn get_fulfillment_orders(
        &self,
        order: &ShopifyGid,
    ) -> Result<Vec<FulfillmentOrder>, ShopifyError> {
        self.record(ShopifyCall::GetFulfillmentOrders(order.to_string()));
        self.check(ShopifyAction::Fulfill)?;
        Ok(lock(&self.fulfillment_orders).clone())
    }

    async fn create_fulfillment(
        &self,
        request: &FulfillmentRequest,
    ) -> Result<String, ShopifyError> {
        self.record(ShopifyCall::CreateFulfillment(request.clone()));
        self.check(ShopifyAction::Fulfill)?;
        Ok(format!("gid://shopify/Fulfillment/{}", request.line_items.len()))
    }

    async fn close_order(&self, order: &ShopifyGid) -> Result<(), ShopifyError> {
        self.record(ShopifyCall::Close(order.to_string()));
        self.check(ShopifyAction::Close)
    }

    async fn cancel_order(
        &self,
        order: &ShopifyGid,
        options: &CancelOptions,
    ) -> Result<(), ShopifyError> {
        self.record(ShopifyCall::Cancel(order.to_string(), *options));
        self.check(ShopifyAction::Cancel)
    }
}

// =============================================================================
// eSputnik
// =============================================================================

#[derive(Default)]
pub struct RecordingEvents {
    orders: Mutex<Vec<EsputnikOrder>>,
    events: Mutex<Vec<EsputnikEvent>>,
    failing: Mutex<bool>,
}

impl RecordingEvents {
    /// Orders successfully sent.
    #[must_use]
    pub fn orders(&self) -> Vec<EsputnikOrder> {
        lock(&self.orders).clone()
    }

    /// Events successfully sent.
    #[must_use]
    pub fn events(&self) -> Vec<EsputnikEvent> {
        lock(&self.events).clone()
    }

    /// Fail every send from now on.
    pub fn fail_sends(&self) {
        *lock(&self.failing) = true;
    }

    fn check(&self) -> Result<(), EsputnikError> {
        if *lock(&self.failing) {
            return Err(EsputnikError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OrderEvents for RecordingEvents {
    async fn send_orders(&self, orders: &[EsputnikOrder]) -> Result<(), EsputnikError> {
        self.check()?;
        lock(&self.orders).extend_from_slice(orders);
        Ok(())
    }

    async fn send_event(&self, event: &EsputnikEvent) -> Result<(), EsputnikError> {
        self.check()?;
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

// =============================================================================
// keyCRM
// =============================================================================

/// Assigns keyCRM ids from 1000 upwards.
#[derive(Default)]
pub struct RecordingCrm {
    created: Mutex<Vec<NewCrmOrder>>,
    failing: Mutex<bool>,
}

impl RecordingCrm {
    #[must_use]
    pub fn created(&self) -> Vec<NewCrmOrder> {
        lock(&self.created).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }
}

#[async_trait]
impl CrmOrders for RecordingCrm {
    async fn create_order(&self, order: &NewCrmOrder) -> Result<KeycrmOrderId, KeycrmError> {
        if *lock(&self.failing) {
            return Err(KeycrmError::Api {
                status: 500,
                message: "keyCRM is down".to_string(),
            });
        }
        let mut created = lock(&self.created);
        created.push(order.clone());
        let next = i64::try_from(created.len()).unwrap_or(i64::MAX);
        Ok(KeycrmOrderId::new(999 + next))
    }

    async fn find_order_by_source_uuid(
        &self,
        source_uuid: &str,
    ) -> Result<Option<KeycrmOrderId>, KeycrmError> {
        if *lock(&self.failing) {
            return Err(KeycrmError::Api {
                status: 500,
                message: "keyCRM is down".to_string(),
            });
        }
        Ok(lock(&self.created)
            .iter()
            .position(|order| order.source_uuid == source_uuid)
            .map(|index| {
                let index = i64::try_from(index).unwrap_or(i64::MAX);
                KeycrmOrderId::new(1000_i64.saturating_add(index))
            }))
    }
}

// =============================================================================
// Price tracking
// =============================================================================

#[derive(Default)]
pub struct InMemoryPriceStore {
    snapshots: Mutex<Vec<PriceSnapshot>>,
    subscriptions: Mutex<Vec<PriceSubscription>>,
}

impl InMemoryPriceStore {
    #[must_use]
    pub fn snapshots(&self) -> Vec<PriceSnapshot> {
        lock(&self.snapshots).clone()
    }

    #[must_use]
    pub fn subscription(&self, id: Uuid) -> Option<PriceSubscription> {
        lock(&self.subscriptions)
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Seed a snapshot as if it had been recorded earlier.
    pub fn seed_snapshot(
        &self,
        product_id: ProductId,
        variant_id: VariantId,
        price: Decimal,
        available: bool,
    ) {
        let mut snapshots = lock(&self.snapshots);
        let id = i64::try_from(snapshots.len()).unwrap_or(i64::MAX) + 1;
        snapshots.push(PriceSnapshot {
            id,
            product_id,
            variant_id,
            price,
            compare_at_price: None,
            available,
            recorded_at: Utc::now(),
        });
    }
}

#[async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn latest_snapshot(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<PriceSnapshot>, RepositoryError> {
        Ok(lock(&self.snapshots)
            .iter()
            .rev()
            .find(|s| s.variant_id == variant_id)
            .cloned())
    }

    async fn record_snapshot(
        &self,
        snapshot: &NewPriceSnapshot,
    ) -> Result<PriceSnapshot, RepositoryError> {
        let mut snapshots = lock(&self.snapshots);
        let recorded = PriceSnapshot {
            id: i64::try_from(snapshots.len()).unwrap_or(i64::MAX) + 1,
            product_id: snapshot.product_id,
            variant_id: snapshot.variant_id,
            price: snapshot.price,
            compare_at_price: snapshot.compare_at_price,
            available: snapshot.available,
            recorded_at: Utc::now(),
        };
        snapshots.push(recorded.clone());
        Ok(recorded)
    }

    async fn active_subscriptions(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<PriceSubscription>, RepositoryError> {
        Ok(lock(&self.subscriptions)
            .iter()
            .filter(|s| s.active && s.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn create_subscription(
        &self,
        subscription: &NewPriceSubscription,
    ) -> Result<PriceSubscription, RepositoryError> {
        let created = PriceSubscription {
            id: Uuid::new_v4(),
            email: subscription.email.clone(),
            product_id: subscription.product_id,
            variant_id: subscription.variant_id,
            kind: subscription.kind,
            target_price: subscription.target_price,
            active: true,
            created_at: Utc::now(),
            notified_at: None,
        };
        lock(&self.subscriptions).push(created.clone());
        Ok(created)
    }

    async fn mark_notified(&self, id: Uuid, deactivate: bool) -> Result<(), RepositoryError> {
        if let Some(subscription) = lock(&self.subscriptions).iter_mut().find(|s| s.id == id) {
            subscription.notified_at = Some(Utc::now());
            subscription.active &= !deactivate;
        }
        Ok(())
    }

    async fn deactivate_subscription(&self, id: Uuid) -> Result<bool, RepositoryError> {
        Ok(lock(&self.subscriptions)
            .iter_mut()
            .find(|s| s.id == id)
            .map(|s| s.active = false)
            .is_some())
    }
}

// =============================================================================
// Dead letters
// =============================================================================

#[derive(Default)]
pub struct InMemoryFailedJobStore {
    jobs: Mutex<Vec<FailedJob>>,
}

impl InMemoryFailedJobStore {
    #[must_use]
    pub fn jobs(&self) -> Vec<FailedJob> {
        lock(&self.jobs).clone()
    }
}

#[async_trait]
impl FailedJobStore for InMemoryFailedJobStore {
    async fn record(&self, job: &FailedJob) -> Result<(), RepositoryError> {
        lock(&self.jobs).push(job.clone());
        Ok(())
    }
}

/// Job rows in memory, with the same lease rules as the table.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<Vec<(StoredJob, Option<String>)>>,
    fail_inserts: AtomicBool,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn jobs(&self) -> Vec<StoredJob> {
        lock(&self.jobs).iter().map(|(job, _)| job.clone()).collect()
    }

    #[must_use]
    pub fn last_error(&self, id: Uuid) -> Option<String> {
        lock(&self.jobs)
            .iter()
            .find(|(job, _)| job.id == id)
            .and_then(|(_, error)| error.clone())
    }

    /// Make every later insert fail, as if the database were down.
    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &StoredJob) -> Result<(), RepositoryError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        lock(&self.jobs).push((job.clone(), None));
        Ok(())
    }

    async fn claim_expired(
        &self,
        queue: &str,
        limit: u32,
        locked_until: DateTime<Utc>,
    ) -> Result<Vec<StoredJob>, RepositoryError> {
        let now = Utc::now();
        let mut jobs = lock(&self.jobs);
        jobs.sort_by_key(|(job, _)| job.run_at);
        let claimed = jobs
            .iter_mut()
            .filter(|(job, _)| job.queue == queue && job.locked_until < now)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|(job, _)| {
                job.locked_until = locked_until;
                job.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        run_at: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), RepositoryError> {
        if let Some((job, error)) = lock(&self.jobs).iter_mut().find(|(job, _)| job.id == id) {
            job.attempts = attempts;
            job.run_at = run_at;
            job.locked_until = locked_until;
            *error = Some(last_error.to_string());
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid) -> Result<(), RepositoryError> {
        lock(&self.jobs).retain(|(job, _)| job.id != id);
        Ok(())
    }
}

// =============================================================================
// Application harness
// =============================================================================

/// Shopify webhook secret used by [`TestApp`].
pub const SHOPIFY_WEBHOOK_SECRET: &str = "test-shopify-webhook-secret";
/// keyCRM webhook token used by [`TestApp`].
pub const KEYCRM_WEBHOOK_TOKEN: &str = "test-keycrm-token";

/// The full router wired to in-memory doubles.
///
/// The database pool is lazy and points at a closed port, so only the
/// readiness check ever touches it. Queued jobs are stored in `jobs` and
/// stay in the receivers for inspection. Build it inside a Tokio runtime.
pub struct TestApp {
    pub state: AppState,
    pub mappings: Arc<InMemoryOrderMappingStore>,
    pub shopify: Arc<RecordingShopify>,
    pub events: Arc<RecordingEvents>,
    pub prices: Arc<InMemoryPriceStore>,
    pub jobs: Arc<InMemoryJobStore>,
    pub orders: JobReceiver<OrderSyncJob>,
    pub order_events: JobReceiver<OrderEventJob>,
    pub price_jobs: JobReceiver<PriceTrackingJob>,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        let mappings = Arc::new(InMemoryOrderMappingStore::default());
        let shopify = Arc::new(RecordingShopify::default());
        let events = Arc::new(RecordingEvents::default());
        let prices = Arc::new(InMemoryPriceStore::default());
        let jobs = Arc::new(InMemoryJobStore::default());

        let (orders_queue, orders) =
            queue::channel(queue::SHOPIFY_ORDERS, JobOptions::default(), jobs.clone());
        let (events_queue, order_events) =
            queue::channel(queue::ESPUTNIK_ORDERS, JobOptions::default(), jobs.clone());
        let (prices_queue, price_jobs) =
            queue::channel(queue::PRICE_TRACKING, JobOptions::default(), jobs.clone());

        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(250))
            .connect_lazy_with(
                PgConnectOptions::new()
                    .host("127.0.0.1")
                    .port(1)
                    .database("storelink_test"),
            );

        let state = AppState::new(
            pool,
            WebhookSecrets {
                shopify: SecretString::from(SHOPIFY_WEBHOOK_SECRET),
                keycrm: Some(SecretString::from(KEYCRM_WEBHOOK_TOKEN)),
            },
            FanoutEngine::new(mappings.clone(), shopify.clone(), events.clone()),
            Queues {
                orders: orders_queue,
                order_events: events_queue,
                prices: prices_queue,
            },
            prices.clone(),
        );

        Self {
            state,
            mappings,
            shopify,
            events,
            prices,
            jobs,
            orders,
            order_events,
            price_jobs,
        }
    }

    #[must_use]
    pub fn router(&self) -> Router {
        routes::routes().with_state(self.state.clone())
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}
