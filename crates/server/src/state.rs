//! Application state shared across handlers.

use std::sync::Arc;

use secrecy::SecretString;
use sqlx::PgPool;

use crate::db::PriceStore;
use crate::fanout::FanoutEngine;
use crate::queue::JobQueue;
use crate::workers::{OrderEventJob, OrderSyncJob, PriceTrackingJob};

/// Producer handles for the three job queues.
#[derive(Clone)]
pub struct Queues {
    pub orders: JobQueue<OrderSyncJob>,
    pub order_events: JobQueue<OrderEventJob>,
    pub prices: JobQueue<PriceTrackingJob>,
}

/// Secrets used to authenticate inbound webhooks.
pub struct WebhookSecrets {
    /// Shopify HMAC key.
    pub shopify: SecretString,
    /// Shared `?token=` for keyCRM. `None` accepts every request.
    pub keycrm: Option<SecretString>,
}

/// Application state shared across all handlers.
///
/// Cheap to clone; everything lives behind one `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pool: PgPool,
    secrets: WebhookSecrets,
    fanout: FanoutEngine,
    queues: Queues,
    prices: Arc<dyn PriceStore>,
}

impl AppState {
    #[must_use]
    pub fn new(
        pool: PgPool,
        secrets: WebhookSecrets,
        fanout: FanoutEngine,
        queues: Queues,
        prices: Arc<dyn PriceStore>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                pool,
                secrets,
                fanout,
                queues,
                prices,
            }),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    #[must_use]
    pub fn secrets(&self) -> &WebhookSecrets {
        &self.inner.secrets
    }

    #[must_use]
    pub fn fanout(&self) -> &FanoutEngine {
        &self.inner.fanout
    }

    #[must_use]
    pub fn queues(&self) -> &Queues {
        &self.inner.queues
    }

    #[must_use]
    pub fn prices(&self) -> &dyn PriceStore {
        self.inner.prices.as_ref()
    }
}
