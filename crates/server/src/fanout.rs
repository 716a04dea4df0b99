//! keyCRM order status fanout.
//!
//! A status change reported by keyCRM is joined to its Shopify order through
//! the mapping store, then translated into at most one eSputnik lifecycle
//! event and a fixed-order list of Shopify mutations.
//!
//! The eSputnik notification is best effort: any failure building or sending
//! it is logged and recorded in the outcome. Shopify mutations are not: the
//! first failure aborts the remaining actions and is returned to the caller.
//! Nothing is deduplicated, so replaying an event replays its mutations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use storelink_core::{
    ActionSet, EsputnikOrderStatus, KeycrmOrderId, KeycrmStatusId, ShopifyAction, ShopifyGid,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::db::{MappingError, OrderMapping, OrderMappingStore};
use crate::esputnik::{EsputnikError, EsputnikOrder, OrderEvents, OrderSource};
use crate::shopify::{
    CancelOptions, FulfillmentLineItem, FulfillmentOrder, FulfillmentRequest, ShopifyError,
    ShopifyOrders,
};

/// A keyCRM status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEvent {
    pub keycrm_order_id: KeycrmOrderId,
    pub status_id: KeycrmStatusId,
    pub received_at: DateTime<Utc>,
}

impl StatusEvent {
    #[must_use]
    pub fn new(keycrm_order_id: KeycrmOrderId, status_id: KeycrmStatusId) -> Self {
        Self {
            keycrm_order_id,
            status_id,
            received_at: Utc::now(),
        }
    }
}

/// Where an event is in its handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutPhase {
    Received,
    Resolved,
    /// No mapping for the keyCRM order; terminal.
    Dropped,
    Notifying,
    Acting,
    Done,
}

impl FanoutPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Resolved => "resolved",
            Self::Dropped => "dropped",
            Self::Notifying => "notifying",
            Self::Acting => "acting",
            Self::Done => "done",
        }
    }
}

/// What happened to the eSputnik notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The status has no lifecycle event.
    NotApplicable,
    Sent(EsputnikOrderStatus),
    Failed {
        status: EsputnikOrderStatus,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOutcome {
    /// No mapping exists; nothing was called.
    Dropped { keycrm_order_id: KeycrmOrderId },
    Completed {
        mapping: OrderMapping,
        notification: NotificationOutcome,
        /// Shopify actions applied, in order.
        actions: Vec<ShopifyAction>,
    },
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("mapping lookup failed: {0}")]
    Mapping(#[from] MappingError),

    /// A Shopify action failed; the ones in `completed` had already applied.
    #[error("Shopify {action} failed (completed: {completed:?}): {source}")]
    Action {
        action: ShopifyAction,
        completed: Vec<ShopifyAction>,
        #[source]
        source: ShopifyError,
    },
}

#[derive(Debug, Error)]
enum NotifyError {
    #[error("order lookup failed: {0}")]
    Shopify(#[from] ShopifyError),
    #[error("send failed: {0}")]
    Esputnik(#[from] EsputnikError),
}

/// Applies keyCRM status changes to Shopify and eSputnik.
#[derive(Clone)]
pub struct FanoutEngine {
    mappings: Arc<dyn OrderMappingStore>,
    shopify: Arc<dyn ShopifyOrders>,
    events: Arc<dyn OrderEvents>,
}

impl FanoutEngine {
    pub fn new(
        mappings: Arc<dyn OrderMappingStore>,
        shopify: Arc<dyn ShopifyOrders>,
        events: Arc<dyn OrderEvents>,
    ) -> Self {
        Self {
            mappings,
            shopify,
            events,
        }
    }

    /// Handle one status change.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::Mapping`] if the mapping store fails and
    /// [`FanoutError::Action`] on the first failed Shopify action.
    #[instrument(
        skip(self, event),
        fields(keycrm_order_id = %event.keycrm_order_id, status_id = %event.status_id)
    )]
    pub async fn handle(&self, event: &StatusEvent) -> Result<FanoutOutcome, FanoutError> {
        enter(FanoutPhase::Received);
        let actions = ActionSet::for_status(event.status_id);

        let Some(mapping) = self
            .mappings
            .find_by_keycrm_id(event.keycrm_order_id)
            .await?
        else {
            warn!("No order mapping for keyCRM order, dropping status event");
            enter(FanoutPhase::Dropped);
            return Ok(FanoutOutcome::Dropped {
                keycrm_order_id: event.keycrm_order_id,
            });
        };
        enter(FanoutPhase::Resolved);

        let order = mapping.shopify_order_id.to_gid();

        enter(FanoutPhase::Notifying);
        let notification = match actions.esputnik_event {
            None => NotificationOutcome::NotApplicable,
            Some(status) => match self.notify(&order, status).await {
                Ok(()) => {
                    info!(%status, "Order status sent to eSputnik");
                    NotificationOutcome::Sent(status)
                }
                Err(e) => {
                    warn!(%status, error = %e, "eSputnik notification failed, continuing");
                    NotificationOutcome::Failed {
                        status,
                        error: e.to_string(),
                    }
                }
            },
        };

        enter(FanoutPhase::Acting);
        let mut completed = Vec::with_capacity(actions.shopify_actions.len());
        for action in &actions.shopify_actions {
            self.apply(*action, &order)
                .await
                .map_err(|source| FanoutError::Action {
                    action: *action,
                    completed: completed.clone(),
                    source,
                })?;
            info!(%action, order_id = %order, "Shopify action applied");
            completed.push(*action);
        }

        enter(FanoutPhase::Done);
        Ok(FanoutOutcome::Completed {
            mapping,
            notification,
            actions: completed,
        })
    }

    async fn notify(
        &self,
        order: &ShopifyGid,
        status: EsputnikOrderStatus,
    ) -> Result<(), NotifyError> {
        let detail = self.shopify.get_order_detail(order).await?;
        let payload = EsputnikOrder::from_source(OrderSource::Admin(&detail), status);
        self.events.send_orders(std::slice::from_ref(&payload)).await?;
        Ok(())
    }

    async fn apply(&self, action: ShopifyAction, order: &ShopifyGid) -> Result<(), ShopifyError> {
        match action {
            ShopifyAction::MarkPaid => self.shopify.mark_order_as_paid(order).await,
            ShopifyAction::Fulfill => self.fulfill(order).await,
            ShopifyAction::Close => self.shopify.close_order(order).await,
            ShopifyAction::Cancel => {
                self.shopify
                    .cancel_order(order, &CancelOptions::from_crm())
                    .await
            }
        }
    }

    async fn fulfill(&self, order: &ShopifyGid) -> Result<(), ShopifyError> {
        let fulfillment_orders = self.shopify.get_fulfillment_orders(order).await?;
        let requests = plan_fulfillments(&fulfillment_orders);

        if requests.is_empty() {
            info!(order_id = %order, "No open fulfillment orders, nothing to fulfill");
            return Ok(());
        }

        for request in &requests {
            let fulfillment_id = self.shopify.create_fulfillment(request).await?;
            debug!(
                fulfillment_order_id = %request.fulfillment_order_id,
                fulfillment_id = %fulfillment_id,
                "Fulfillment created"
            );
        }
        Ok(())
    }
}

fn enter(phase: FanoutPhase) {
    debug!(phase = phase.as_str(), "Fanout phase");
}

/// One fulfillment per open fulfillment order, covering every line item
/// that still has quantity left.
#[must_use]
pub fn plan_fulfillments(fulfillment_orders: &[FulfillmentOrder]) -> Vec<FulfillmentRequest> {
    fulfillment_orders
        .iter()
        .filter(|fo| fo.status.is_fulfillable())
        .filter_map(|fo| {
            let line_items: Vec<_> = fo
                .line_items
                .iter()
                .filter(|li| li.remaining_quantity > 0)
                .map(|li| FulfillmentLineItem {
                    id: li.id.clone(),
                    quantity: li.remaining_quantity,
                })
                .collect();

            (!line_items.is_empty()).then(|| FulfillmentRequest {
                fulfillment_order_id: fo.id.clone(),
                line_items,
                notify_customer: false,
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shopify::{FulfillmentOrderLineItem, FulfillmentOrderStatus};
    use crate::testing::{
        InMemoryOrderMappingStore, RecordingEvents, RecordingShopify, ShopifyCall,
    };
    use storelink_core::{LocalOrderId, ShopifyOrderId};

    const ORDER_GID: &str = "gid://shopify/Order/5551234";

    struct Harness {
        engine: FanoutEngine,
        mappings: Arc<InMemoryOrderMappingStore>,
        shopify: Arc<RecordingShopify>,
        events: Arc<RecordingEvents>,
    }

    async fn harness() -> Harness {
        let mappings = Arc::new(InMemoryOrderMappingStore::default());
        mappings
            .create(LocalOrderId::new(1001), &ShopifyOrderId::from(5_551_234))
            .await
            .unwrap();
        mappings
            .attach_keycrm_id(LocalOrderId::new(1001), KeycrmOrderId::new(42))
            .await
            .unwrap();

        let shopify = Arc::new(RecordingShopify::default());
        let events = Arc::new(RecordingEvents::default());
        let engine = FanoutEngine::new(mappings.clone(), shopify.clone(), events.clone());
        Harness {
            engine,
            mappings,
            shopify,
            events,
        }
    }

    fn event(status: i32) -> StatusEvent {
        StatusEvent::new(KeycrmOrderId::new(42), KeycrmStatusId::new(status))
    }

    fn line(id: &str, remaining: i64) -> FulfillmentOrderLineItem {
        FulfillmentOrderLineItem {
            id: id.to_string(),
            total_quantity: remaining.max(1),
            remaining_quantity: remaining,
        }
    }

    #[tokio::test]
    async fn test_paid_status_notifies_then_marks_paid() {
        let h = harness().await;
        let before = h.mappings.all();
        assert_eq!(before.len(), 1);

        let outcome = h.engine.handle(&event(3)).await.unwrap();

        let FanoutOutcome::Completed {
            mapping,
            notification,
            actions,
        } = outcome
        else {
            panic!("expected completed outcome");
        };
        assert_eq!(mapping.local_order_id, LocalOrderId::new(1001));
        assert_eq!(
            notification,
            NotificationOutcome::Sent(EsputnikOrderStatus::Initialized)
        );
        assert_eq!(actions, vec![ShopifyAction::MarkPaid]);
        assert_eq!(
            h.shopify.calls(),
            vec![
                ShopifyCall::GetOrderDetail(ORDER_GID.to_string()),
                ShopifyCall::MarkPaid(ORDER_GID.to_string()),
            ]
        );
        let sent = h.events.orders();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, EsputnikOrderStatus::Initialized);
        assert_eq!(sent[0].external_order_id, "5551234");

        // Fanout reads the mapping and never writes it
        assert_eq!(h.mappings.all(), before);
    }

    #[tokio::test]
    async fn test_unmapped_order_is_dropped_without_calls() {
        let h = harness().await;
        let unknown = StatusEvent::new(KeycrmOrderId::new(999), KeycrmStatusId::new(3));

        let outcome = h.engine.handle(&unknown).await.unwrap();

        assert_eq!(
            outcome,
            FanoutOutcome::Dropped {
                keycrm_order_id: KeycrmOrderId::new(999)
            }
        );
        assert!(h.shopify.calls().is_empty());
        assert!(h.events.orders().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_status_does_nothing() {
        let h = harness().await;

        let outcome = h.engine.handle(&event(99)).await.unwrap();

        assert!(matches!(
            outcome,
            FanoutOutcome::Completed { notification: NotificationOutcome::NotApplicable, ref actions, .. }
                if actions.is_empty()
        ));
        assert!(h.shopify.calls().is_empty());
        assert!(h.events.orders().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_uses_crm_options() {
        let h = harness().await;

        h.engine.handle(&event(19)).await.unwrap();

        assert_eq!(h.events.orders()[0].status, EsputnikOrderStatus::Cancelled);
        let cancel = h
            .shopify
            .calls()
            .into_iter()
            .find_map(|call| match call {
                ShopifyCall::Cancel(order, options) => Some((order, options)),
                _ => None,
            })
            .unwrap();
        assert_eq!(cancel.0, ORDER_GID);
        assert!(cancel.1.restock);
        assert!(!cancel.1.refund);
        assert!(!cancel.1.notify_customer);
    }

    #[tokio::test]
    async fn test_esputnik_failure_does_not_block_shopify() {
        let h = harness().await;
        h.events.fail_sends();

        let outcome = h.engine.handle(&event(12)).await.unwrap();

        let FanoutOutcome::Completed {
            notification,
            actions,
            ..
        } = outcome
        else {
            panic!("expected completed outcome");
        };
        assert!(matches!(notification, NotificationOutcome::Failed { .. }));
        assert_eq!(actions, vec![ShopifyAction::Close]);
        assert!(
            h.shopify
                .calls()
                .contains(&ShopifyCall::Close(ORDER_GID.to_string()))
        );
    }

    #[tokio::test]
    async fn test_order_lookup_failure_is_best_effort() {
        let h = harness().await;
        h.shopify.fail_order_detail();

        let outcome = h.engine.handle(&event(3)).await.unwrap();

        assert!(matches!(
            outcome,
            FanoutOutcome::Completed { notification: NotificationOutcome::Failed { .. }, .. }
        ));
        assert!(h.events.orders().is_empty());
        assert!(
            h.shopify
                .calls()
                .contains(&ShopifyCall::MarkPaid(ORDER_GID.to_string()))
        );
    }

    #[tokio::test]
    async fn test_shopify_failure_surfaces_action() {
        let h = harness().await;
        h.shopify.fail_action(ShopifyAction::MarkPaid);

        let err = h.engine.handle(&event(21)).await.unwrap_err();

        match err {
            FanoutError::Action {
                action, completed, ..
            } => {
                assert_eq!(action, ShopifyAction::MarkPaid);
                assert!(completed.is_empty());
            }
            FanoutError::Mapping(_) => panic!("expected action error"),
        }
    }

    #[tokio::test]
    async fn test_replayed_event_repeats_mutation() {
        let h = harness().await;

        h.engine.handle(&event(21)).await.unwrap();
        h.engine.handle(&event(21)).await.unwrap();

        let paid = h
            .shopify
            .calls()
            .into_iter()
            .filter(|call| matches!(call, ShopifyCall::MarkPaid(_)))
            .count();
        assert_eq!(paid, 2);
    }

    #[tokio::test]
    async fn test_fulfill_only_open_remaining_items() {
        let h = harness().await;
        h.shopify.set_fulfillment_orders(vec![
            FulfillmentOrder {
                id: "gid://shopify/FulfillmentOrder/1".to_string(),
                status: FulfillmentOrderStatus::Closed,
                line_items: vec![line("gid://shopify/FulfillmentOrderLineItem/10", 3)],
            },
            FulfillmentOrder {
                id: "gid://shopify/FulfillmentOrder/2".to_string(),
                status: FulfillmentOrderStatus::Open,
                line_items: vec![
                    line("gid://shopify/FulfillmentOrderLineItem/20", 2),
                    line("gid://shopify/FulfillmentOrderLineItem/21", 0),
                ],
            },
        ]);

        h.engine.handle(&event(8)).await.unwrap();

        let created: Vec<_> = h
            .shopify
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ShopifyCall::CreateFulfillment(request) => Some(request),
                _ => None,
            })
            .collect();
        assert_eq!(
            created,
            vec![FulfillmentRequest {
                fulfillment_order_id: "gid://shopify/FulfillmentOrder/2".to_string(),
                line_items: vec![FulfillmentLineItem {
                    id: "gid://shopify/FulfillmentOrderLineItem/20".to_string(),
                    quantity: 2,
                }],
                notify_customer: false,
            }]
        );
    }

    #[test]
    fn test_plan_skips_empty_and_closed() {
        let plan = plan_fulfillments(&[
            FulfillmentOrder {
                id: "a".to_string(),
                status: FulfillmentOrderStatus::InProgress,
                line_items: vec![line("a1", 0)],
            },
            FulfillmentOrder {
                id: "b".to_string(),
                status: FulfillmentOrderStatus::OnHold,
                line_items: vec![line("b1", 4)],
            },
            FulfillmentOrder {
                id: "c".to_string(),
                status: FulfillmentOrderStatus::InProgress,
                line_items: vec![line("c1", 1), line("c2", 5)],
            },
        ]);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].fulfillment_order_id, "c");
        assert_eq!(plan[0].line_items.len(), 2);
        assert!(plan_fulfillments(&[]).is_empty());
    }
}
