//! Job payloads and their handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storelink_core::EsputnikOrderStatus;
use tracing::{info, instrument, warn};

use crate::db::{MappingError, OrderMappingStore};
use crate::esputnik::{EsputnikOrder, OrderEvents, OrderSource};
use crate::keycrm::{CrmOrders, NewCrmOrder};
use crate::pricing::PriceTracker;
use crate::queue::{JobError, JobHandler};
use crate::shopify::webhooks::{OrderWebhook, ProductWebhook};

/// Work on the `shopify-orders` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "order", rename_all = "snake_case")]
pub enum OrderSyncJob {
    /// Push the order into keyCRM and link the ids.
    Created(OrderWebhook),
}

/// Work on the `esputnik-orders` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEventJob {
    pub status: EsputnikOrderStatus,
    pub order: OrderWebhook,
}

/// Work on the `price-tracking` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "product", rename_all = "snake_case")]
pub enum PriceTrackingJob {
    ProductUpdated(ProductWebhook),
}

// =============================================================================
// Order sync
// =============================================================================

/// Creates the keyCRM order for a new Shopify order and records the mapping.
pub struct OrderSyncHandler {
    mappings: Arc<dyn OrderMappingStore>,
    crm: Arc<dyn CrmOrders>,
    source_id: i64,
}

impl OrderSyncHandler {
    pub fn new(
        mappings: Arc<dyn OrderMappingStore>,
        crm: Arc<dyn CrmOrders>,
        source_id: i64,
    ) -> Self {
        Self {
            mappings,
            crm,
            source_id,
        }
    }

    /// When the mapping already exists without a keyCRM id, keyCRM is
    /// searched by `source_uuid` first. A retry after a failed link then
    /// reuses the order instead of creating a second one.
    #[instrument(skip(self, order), fields(shopify_order_id = order.id, local_order_id = order.order_number))]
    async fn sync(&self, order: &OrderWebhook) -> Result<(), JobError> {
        let shopify_order_id = order.shopify_order_id();
        let local_order_id = order.local_order_id();

        // Set when an earlier attempt may already have created the keyCRM order
        let resumed = match self.mappings.find_by_shopify_id(&shopify_order_id).await? {
            Some(existing) if existing.keycrm_order_id.is_some() => {
                info!(keycrm_order_id = ?existing.keycrm_order_id, "Order already synced");
                return Ok(());
            }
            Some(_) => true,
            None => match self.mappings.create(local_order_id, &shopify_order_id).await {
                Ok(_) => false,
                // Lost a race with a concurrent delivery of the same order
                Err(MappingError::DuplicateMapping(_)) => true,
                Err(e) => return Err(e.into()),
            },
        };

        let crm_order = NewCrmOrder::from_webhook(order, self.source_id);
        let found = if resumed {
            self.crm
                .find_order_by_source_uuid(&crm_order.source_uuid)
                .await?
        } else {
            None
        };
        let keycrm_order_id = match found {
            Some(id) => {
                info!(keycrm_order_id = %id, "keyCRM order already exists, linking it");
                id
            }
            None => self.crm.create_order(&crm_order).await?,
        };

        self.mappings
            .attach_keycrm_id(local_order_id, keycrm_order_id)
            .await
            .inspect_err(|e| {
                warn!(%keycrm_order_id, error = %e, "keyCRM order created but not linked");
            })?;

        info!(%keycrm_order_id, "Order synced to keyCRM");
        Ok(())
    }
}

#[async_trait]
impl JobHandler<OrderSyncJob> for OrderSyncHandler {
    async fn process(&self, job: &OrderSyncJob) -> Result<(), JobError> {
        match job {
            OrderSyncJob::Created(order) => self.sync(order).await,
        }
    }
}

// =============================================================================
// Lifecycle events
// =============================================================================

/// Sends Shopify-originated lifecycle events to eSputnik.
pub struct OrderEventHandler {
    events: Arc<dyn OrderEvents>,
}

impl OrderEventHandler {
    pub fn new(events: Arc<dyn OrderEvents>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl JobHandler<OrderEventJob> for OrderEventHandler {
    #[instrument(skip(self, job), fields(shopify_order_id = job.order.id, status = %job.status))]
    async fn process(&self, job: &OrderEventJob) -> Result<(), JobError> {
        let order = EsputnikOrder::from_source(OrderSource::Webhook(&job.order), job.status);
        self.events.send_orders(&[order]).await?;
        info!("Order event sent");
        Ok(())
    }
}

// =============================================================================
// Price tracking
// =============================================================================

pub struct PriceTrackingHandler {
    tracker: PriceTracker,
}

impl PriceTrackingHandler {
    #[must_use]
    pub const fn new(tracker: PriceTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl JobHandler<PriceTrackingJob> for PriceTrackingHandler {
    async fn process(&self, job: &PriceTrackingJob) -> Result<(), JobError> {
        match job {
            PriceTrackingJob::ProductUpdated(product) => {
                self.tracker.process_product(product).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use storelink_core::{KeycrmOrderId, LocalOrderId};

    use super::*;
    use crate::shopify::webhooks::WebhookLineItem;
    use crate::testing::{InMemoryOrderMappingStore, RecordingCrm, RecordingEvents};

    fn order() -> OrderWebhook {
        OrderWebhook {
            id: 5_551_234,
            order_number: 1042,
            name: "#1042".to_string(),
            email: Some("buyer@example.ua".to_string()),
            phone: Some("+380501234567".to_string()),
            created_at: Utc::now(),
            currency: "UAH".to_string(),
            total_price: Decimal::new(59_800, 2),
            total_discounts: None,
            total_shipping_price_set: None,
            note: None,
            customer: None,
            shipping_address: None,
            line_items: vec![WebhookLineItem {
                id: 1,
                product_id: Some(5),
                variant_id: Some(6),
                title: "Sencha".to_string(),
                variant_title: None,
                sku: Some("TEA-1".to_string()),
                quantity: 2,
                price: Decimal::new(29_900, 2),
            }],
        }
    }

    struct Harness {
        mappings: Arc<InMemoryOrderMappingStore>,
        crm: Arc<RecordingCrm>,
        handler: OrderSyncHandler,
    }

    fn harness() -> Harness {
        let mappings = Arc::new(InMemoryOrderMappingStore::default());
        let crm = Arc::new(RecordingCrm::default());
        let handler = OrderSyncHandler::new(mappings.clone(), crm.clone(), 7);
        Harness {
            mappings,
            crm,
            handler,
        }
    }

    #[tokio::test]
    async fn test_sync_creates_mapping_and_crm_order() {
        let h = harness();

        h.handler
            .process(&OrderSyncJob::Created(order()))
            .await
            .unwrap();

        let created = h.crm.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].source_id, 7);
        let mapping = h
            .mappings
            .find_by_local_id(LocalOrderId::new(1042))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.shopify_order_id.as_str(), "5551234");
        assert_eq!(mapping.keycrm_order_id, Some(KeycrmOrderId::new(1000)));
    }

    #[tokio::test]
    async fn test_sync_is_skipped_once_linked() {
        let h = harness();
        let job = OrderSyncJob::Created(order());

        h.handler.process(&job).await.unwrap();
        h.handler.process(&job).await.unwrap();

        assert_eq!(h.crm.created().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_retries_after_crm_failure() {
        let h = harness();
        let job = OrderSyncJob::Created(order());
        h.crm.set_failing(true);

        let err = h.handler.process(&job).await.unwrap_err();
        assert!(matches!(err, JobError::Keycrm(_)));
        // Mapping exists without a keyCRM id
        let mapping = h
            .mappings
            .find_by_local_id(LocalOrderId::new(1042))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.keycrm_order_id, None);

        h.crm.set_failing(false);
        h.handler.process(&job).await.unwrap();

        assert_eq!(h.crm.created().len(), 1);
        assert!(
            h.mappings
                .find_by_keycrm_id(KeycrmOrderId::new(1000))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_failed_link_reuses_created_crm_order() {
        let h = harness();
        let job = OrderSyncJob::Created(order());
        h.mappings.fail_next_attach();

        let err = h.handler.process(&job).await.unwrap_err();
        assert!(matches!(err, JobError::Mapping(MappingError::Database(_))));
        assert_eq!(h.crm.created().len(), 1);

        h.handler.process(&job).await.unwrap();

        // The retry found the order by source_uuid instead of creating another
        assert_eq!(h.crm.created().len(), 1);
        let mapping = h
            .mappings
            .find_by_local_id(LocalOrderId::new(1042))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.keycrm_order_id, Some(KeycrmOrderId::new(1000)));
    }

    #[tokio::test]
    async fn test_order_event_is_sent_with_status() {
        let events = Arc::new(RecordingEvents::default());
        let handler = OrderEventHandler::new(events.clone());

        handler
            .process(&OrderEventJob {
                status: EsputnikOrderStatus::Cancelled,
                order: order(),
            })
            .await
            .unwrap();

        let sent = events.orders();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, EsputnikOrderStatus::Cancelled);
        assert_eq!(sent[0].external_order_id, "5551234");
    }

    #[tokio::test]
    async fn test_order_event_failure_is_retried() {
        let events = Arc::new(RecordingEvents::default());
        events.fail_sends();
        let handler = OrderEventHandler::new(events);

        let err = handler
            .process(&OrderEventJob {
                status: EsputnikOrderStatus::Initialized,
                order: order(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Esputnik(_)));
    }

    #[test]
    fn test_job_payload_shape() {
        let json = serde_json::to_value(OrderSyncJob::Created(order())).unwrap();
        assert_eq!(json["type"], "created");
        assert_eq!(json["order"]["order_number"], 1042);

        let event = serde_json::to_value(OrderEventJob {
            status: EsputnikOrderStatus::InProgress,
            order: order(),
        })
        .unwrap();
        assert_eq!(event["status"], "IN_PROGRESS");
    }
}
