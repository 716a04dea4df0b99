//! Price history and subscriber notifications.
//!
//! Every product update is diffed against the latest snapshot of each
//! variant. Changed variants get a new snapshot and are matched against the
//! product's active subscriptions.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use storelink_core::{ProductId, SubscriptionKind, VariantId};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{NewPriceSnapshot, PriceSnapshot, PriceStore, PriceSubscription, RepositoryError};
use crate::esputnik::{EsputnikEvent, EventParam, OrderEvents};
use crate::shopify::webhooks::{ProductWebhook, VariantWebhook};

/// A variant whose recorded state changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantChange {
    pub variant_id: VariantId,
    pub previous: PriceSnapshot,
    pub current: NewPriceSnapshot,
}

impl VariantChange {
    #[must_use]
    pub fn price_changed(&self) -> bool {
        self.current.price != self.previous.price
    }

    /// Whether this change fires `subscription`.
    #[must_use]
    pub fn triggers(&self, subscription: &PriceSubscription) -> bool {
        if !subscription.watches(self.variant_id) {
            return false;
        }
        match subscription.kind {
            SubscriptionKind::PriceDrop => {
                self.current.price < self.previous.price
                    && subscription
                        .target_price
                        .is_none_or(|target| self.current.price <= target)
            }
            SubscriptionKind::BackInStock => !self.previous.available && self.current.available,
            SubscriptionKind::AnyChange => self.price_changed(),
        }
    }
}

/// Summary of one processed product update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingReport {
    pub snapshots_recorded: usize,
    pub notified: usize,
    pub failed_notifications: usize,
}

#[derive(Clone)]
pub struct PriceTracker {
    store: Arc<dyn PriceStore>,
    events: Arc<dyn OrderEvents>,
}

impl PriceTracker {
    pub fn new(store: Arc<dyn PriceStore>, events: Arc<dyn OrderEvents>) -> Self {
        Self { store, events }
    }

    /// Notify matching subscribers, then record snapshots for changed
    /// variants.
    ///
    /// Snapshots are written last: a store failure before that point leaves
    /// the previous snapshots in place, so the retried job sees the same
    /// changes and sends the alerts it missed. Notification failures are
    /// counted, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error if snapshots or subscriptions cannot be read or
    /// written.
    #[instrument(skip(self, product), fields(product_id = product.id))]
    pub async fn process_product(
        &self,
        product: &ProductWebhook,
    ) -> Result<TrackingReport, RepositoryError> {
        let product_id = product.product_id();
        let mut report = TrackingReport::default();
        let mut changes = Vec::new();
        let mut pending = Vec::new();

        for variant in &product.variants {
            let current = snapshot_of(product_id, variant);
            match self.store.latest_snapshot(current.variant_id).await? {
                Some(previous) if !current.differs_from(&previous) => {}
                Some(previous) => {
                    pending.push(current.clone());
                    changes.push(VariantChange {
                        variant_id: current.variant_id,
                        previous,
                        current,
                    });
                }
                // First sighting is the baseline
                None => pending.push(current),
            }
        }

        if !changes.is_empty() {
            let subscriptions = self.store.active_subscriptions(product_id).await?;
            let mut fired: HashSet<Uuid> = HashSet::new();

            for change in &changes {
                for subscription in &subscriptions {
                    if fired.contains(&subscription.id) || !change.triggers(subscription) {
                        continue;
                    }
                    fired.insert(subscription.id);

                    if self.notify(product, change, subscription).await {
                        report.notified += 1;
                    } else {
                        report.failed_notifications += 1;
                    }
                }
            }
        }

        for snapshot in &pending {
            self.store.record_snapshot(snapshot).await?;
            report.snapshots_recorded += 1;
        }

        if report == TrackingReport::default() {
            debug!("No tracked changes");
        } else {
            info!(
                recorded = report.snapshots_recorded,
                notified = report.notified,
                failed = report.failed_notifications,
                "Product update tracked"
            );
        }
        Ok(report)
    }

    /// Send one notification and mark the subscription. Returns whether the
    /// event was delivered.
    async fn notify(
        &self,
        product: &ProductWebhook,
        change: &VariantChange,
        subscription: &PriceSubscription,
    ) -> bool {
        let event = notification_event(product, change, subscription);

        if let Err(e) = self.events.send_event(&event).await {
            warn!(
                subscription_id = %subscription.id,
                kind = %subscription.kind,
                error = %e,
                "Price notification failed"
            );
            return false;
        }

        if let Err(e) = self
            .store
            .mark_notified(subscription.id, subscription.kind.is_one_shot())
            .await
        {
            warn!(subscription_id = %subscription.id, error = %e, "Failed to mark subscription notified");
        }
        true
    }
}

fn snapshot_of(product_id: ProductId, variant: &VariantWebhook) -> NewPriceSnapshot {
    NewPriceSnapshot {
        product_id,
        variant_id: variant.variant_id(),
        price: variant.price,
        compare_at_price: variant.compare_at_price,
        available: variant.available(),
    }
}

fn notification_event(
    product: &ProductWebhook,
    change: &VariantChange,
    subscription: &PriceSubscription,
) -> EsputnikEvent {
    let mut params = vec![
        EventParam::new("productId", product.id),
        EventParam::new("productTitle", &product.title),
        EventParam::new("variantId", change.variant_id),
        EventParam::new("oldPrice", change.previous.price.normalize()),
        EventParam::new("newPrice", change.current.price.normalize()),
    ];
    if let Some(handle) = &product.handle {
        params.push(EventParam::new("productHandle", handle));
    }
    if let Some(target) = subscription.target_price {
        params.push(EventParam::new("targetPrice", target.normalize()));
    }
    if change.price_changed() && !change.previous.price.is_zero() {
        let percent = (change.current.price - change.previous.price) / change.previous.price
            * Decimal::ONE_HUNDRED;
        params.push(EventParam::new("changePercent", percent.round_dp(1)));
    }

    EsputnikEvent {
        event_type_key: subscription.kind.event_type_key().to_string(),
        key_value: subscription.email.as_str().to_string(),
        params,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Utc;
    use storelink_core::Email;

    use super::*;
    use crate::db::NewPriceSubscription;
    use crate::testing::{InMemoryPriceStore, RecordingEvents};

    const PRODUCT: ProductId = ProductId::new(10);
    const VARIANT: VariantId = VariantId::new(11);

    fn product(price: i64, inventory: Option<i64>) -> ProductWebhook {
        ProductWebhook {
            id: 10,
            title: "Sencha".to_string(),
            handle: Some("sencha".to_string()),
            variants: vec![VariantWebhook {
                id: 11,
                title: Some("100 g".to_string()),
                price: Decimal::new(price, 2),
                compare_at_price: None,
                inventory_quantity: inventory,
            }],
        }
    }

    fn change(old: i64, new: i64, was_available: bool, available: bool) -> VariantChange {
        VariantChange {
            variant_id: VARIANT,
            previous: PriceSnapshot {
                id: 1,
                product_id: PRODUCT,
                variant_id: VARIANT,
                price: Decimal::new(old, 2),
                compare_at_price: None,
                available: was_available,
                recorded_at: Utc::now(),
            },
            current: NewPriceSnapshot {
                product_id: PRODUCT,
                variant_id: VARIANT,
                price: Decimal::new(new, 2),
                compare_at_price: None,
                available,
            },
        }
    }

    fn subscription(kind: SubscriptionKind, target: Option<i64>) -> PriceSubscription {
        PriceSubscription {
            id: Uuid::new_v4(),
            email: Email::parse("tea@example.ua").unwrap(),
            product_id: PRODUCT,
            variant_id: None,
            kind,
            target_price: target.map(|t| Decimal::new(t, 2)),
            active: true,
            created_at: Utc::now(),
            notified_at: None,
        }
    }

    struct Harness {
        store: Arc<InMemoryPriceStore>,
        events: Arc<RecordingEvents>,
        tracker: PriceTracker,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryPriceStore::default());
        let events = Arc::new(RecordingEvents::default());
        let tracker = PriceTracker::new(store.clone(), events.clone());
        Harness {
            store,
            events,
            tracker,
        }
    }

    async fn subscribe(h: &Harness, kind: SubscriptionKind, target: Option<i64>) -> Uuid {
        h.store
            .create_subscription(&NewPriceSubscription {
                email: Email::parse("tea@example.ua").unwrap(),
                product_id: PRODUCT,
                variant_id: Some(VARIANT),
                kind,
                target_price: target.map(|t| Decimal::new(t, 2)),
            })
            .await
            .unwrap()
            .id
    }

    #[test]
    fn test_price_drop_respects_target() {
        assert!(change(1000, 900, true, true).triggers(&subscription(SubscriptionKind::PriceDrop, None)));
        assert!(
            change(1000, 900, true, true)
                .triggers(&subscription(SubscriptionKind::PriceDrop, Some(900)))
        );
        assert!(
            !change(1000, 950, true, true)
                .triggers(&subscription(SubscriptionKind::PriceDrop, Some(900)))
        );
        assert!(!change(900, 1000, true, true).triggers(&subscription(SubscriptionKind::PriceDrop, None)));
    }

    #[test]
    fn test_back_in_stock_needs_transition() {
        let sub = subscription(SubscriptionKind::BackInStock, None);
        assert!(change(1000, 1000, false, true).triggers(&sub));
        assert!(!change(1000, 900, true, true).triggers(&sub));
        assert!(!change(1000, 1000, true, false).triggers(&sub));
    }

    #[test]
    fn test_any_change_fires_both_directions() {
        let sub = subscription(SubscriptionKind::AnyChange, None);
        assert!(change(1000, 900, true, true).triggers(&sub));
        assert!(change(900, 1000, true, true).triggers(&sub));
        assert!(!change(1000, 1000, false, true).triggers(&sub));
    }

    #[test]
    fn test_other_variant_subscription_is_ignored() {
        let mut sub = subscription(SubscriptionKind::AnyChange, None);
        sub.variant_id = Some(VariantId::new(99));
        assert!(!change(1000, 900, true, true).triggers(&sub));
    }

    #[test]
    fn test_event_params() {
        let sub = subscription(SubscriptionKind::PriceDrop, Some(950));
        let event = notification_event(&product(900, Some(3)), &change(1000, 900, true, true), &sub);

        assert_eq!(event.event_type_key, "price_drop");
        assert_eq!(event.key_value, "tea@example.ua");
        let param = |name: &str| {
            event
                .params
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.clone())
        };
        assert_eq!(param("oldPrice").as_deref(), Some("10"));
        assert_eq!(param("newPrice").as_deref(), Some("9"));
        assert_eq!(param("targetPrice").as_deref(), Some("9.5"));
        assert!(param("changePercent").unwrap().starts_with("-10"));
        assert_eq!(param("productHandle").as_deref(), Some("sencha"));
    }

    #[tokio::test]
    async fn test_first_update_records_baseline_only() {
        let h = harness();
        subscribe(&h, SubscriptionKind::AnyChange, None).await;

        let report = h.tracker.process_product(&product(1000, None)).await.unwrap();

        assert_eq!(report.snapshots_recorded, 1);
        assert_eq!(report.notified, 0);
        assert!(h.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_update_records_nothing() {
        let h = harness();
        h.store.seed_snapshot(PRODUCT, VARIANT, Decimal::new(1000, 2), true);

        let report = h.tracker.process_product(&product(1000, Some(5))).await.unwrap();

        assert_eq!(report, TrackingReport::default());
        assert_eq!(h.store.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn test_price_drop_notifies_and_deactivates() {
        let h = harness();
        h.store.seed_snapshot(PRODUCT, VARIANT, Decimal::new(1000, 2), true);
        let drop = subscribe(&h, SubscriptionKind::PriceDrop, None).await;
        let any = subscribe(&h, SubscriptionKind::AnyChange, None).await;

        let report = h.tracker.process_product(&product(800, None)).await.unwrap();

        assert_eq!(report.notified, 2);
        assert_eq!(h.events.events().len(), 2);
        let drop = h.store.subscription(drop).unwrap();
        assert!(!drop.active);
        assert!(drop.notified_at.is_some());
        let any = h.store.subscription(any).unwrap();
        assert!(any.active);
        assert!(any.notified_at.is_some());
    }

    #[tokio::test]
    async fn test_back_in_stock() {
        let h = harness();
        h.store.seed_snapshot(PRODUCT, VARIANT, Decimal::new(1000, 2), false);
        let id = subscribe(&h, SubscriptionKind::BackInStock, None).await;

        h.tracker.process_product(&product(1000, Some(2))).await.unwrap();

        let events = h.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type_key, "back_in_stock");
        assert!(!h.store.subscription(id).unwrap().active);
    }

    /// Delegates to the in-memory store but fails the first subscription read.
    struct FlakySubscriptions {
        inner: Arc<InMemoryPriceStore>,
        failed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl PriceStore for FlakySubscriptions {
        async fn latest_snapshot(
            &self,
            variant_id: VariantId,
        ) -> Result<Option<PriceSnapshot>, RepositoryError> {
            self.inner.latest_snapshot(variant_id).await
        }

        async fn record_snapshot(
            &self,
            snapshot: &NewPriceSnapshot,
        ) -> Result<PriceSnapshot, RepositoryError> {
            self.inner.record_snapshot(snapshot).await
        }

        async fn active_subscriptions(
            &self,
            product_id: ProductId,
        ) -> Result<Vec<PriceSubscription>, RepositoryError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.active_subscriptions(product_id).await
        }

        async fn create_subscription(
            &self,
            subscription: &NewPriceSubscription,
        ) -> Result<PriceSubscription, RepositoryError> {
            self.inner.create_subscription(subscription).await
        }

        async fn mark_notified(&self, id: Uuid, deactivate: bool) -> Result<(), RepositoryError> {
            self.inner.mark_notified(id, deactivate).await
        }

        async fn deactivate_subscription(&self, id: Uuid) -> Result<bool, RepositoryError> {
            self.inner.deactivate_subscription(id).await
        }
    }

    #[tokio::test]
    async fn test_retry_after_store_failure_still_alerts() {
        let h = harness();
        h.store.seed_snapshot(PRODUCT, VARIANT, Decimal::new(1000, 2), true);
        let id = subscribe(&h, SubscriptionKind::PriceDrop, None).await;
        let tracker = PriceTracker::new(
            Arc::new(FlakySubscriptions {
                inner: h.store.clone(),
                failed: AtomicBool::new(false),
            }),
            h.events.clone(),
        );

        assert!(tracker.process_product(&product(800, None)).await.is_err());
        // Nothing written, so the retry sees the same drop
        assert_eq!(h.store.snapshots().len(), 1);
        assert!(h.events.events().is_empty());

        let report = tracker.process_product(&product(800, None)).await.unwrap();

        assert_eq!(report.notified, 1);
        assert_eq!(report.snapshots_recorded, 1);
        assert_eq!(h.events.events().len(), 1);
        assert!(!h.store.subscription(id).unwrap().active);
    }

    #[tokio::test]
    async fn test_failed_notification_keeps_subscription_and_succeeds() {
        let h = harness();
        h.store.seed_snapshot(PRODUCT, VARIANT, Decimal::new(1000, 2), true);
        let id = subscribe(&h, SubscriptionKind::PriceDrop, None).await;
        h.events.fail_sends();

        let report = h.tracker.process_product(&product(800, None)).await.unwrap();

        assert_eq!(report.failed_notifications, 1);
        assert_eq!(report.snapshots_recorded, 1);
        let sub = h.store.subscription(id).unwrap();
        assert!(sub.active);
        assert!(sub.notified_at.is_none());
    }
}
