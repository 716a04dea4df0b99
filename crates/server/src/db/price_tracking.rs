//! Price history and price alert subscriptions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use storelink_core::{Email, ProductId, SubscriptionKind, VariantId};
use tracing::instrument;
use uuid::Uuid;

use super::RepositoryError;

/// One recorded price/availability state of a variant.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PriceSnapshot {
    pub id: i64,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub price: Decimal,
    pub compare_at_price: Option<Decimal>,
    pub available: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPriceSnapshot {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub price: Decimal,
    pub compare_at_price: Option<Decimal>,
    pub available: bool,
}

impl NewPriceSnapshot {
    /// Whether this state differs from a recorded one.
    #[must_use]
    pub fn differs_from(&self, previous: &PriceSnapshot) -> bool {
        self.price != previous.price
            || self.compare_at_price != previous.compare_at_price
            || self.available != previous.available
    }
}

/// A subscriber waiting for a price event on a product or one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceSubscription {
    pub id: Uuid,
    pub email: Email,
    pub product_id: ProductId,
    /// `None` watches every variant of the product.
    pub variant_id: Option<VariantId>,
    pub kind: SubscriptionKind,
    pub target_price: Option<Decimal>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
}

impl PriceSubscription {
    #[must_use]
    pub fn watches(&self, variant_id: VariantId) -> bool {
        self.variant_id.is_none_or(|v| v == variant_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPriceSubscription {
    pub email: Email,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub kind: SubscriptionKind,
    pub target_price: Option<Decimal>,
}

/// Persistence for price history and subscriptions.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn latest_snapshot(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<PriceSnapshot>, RepositoryError>;

    async fn record_snapshot(
        &self,
        snapshot: &NewPriceSnapshot,
    ) -> Result<PriceSnapshot, RepositoryError>;

    /// Active subscriptions on any variant of the product.
    async fn active_subscriptions(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<PriceSubscription>, RepositoryError>;

    async fn create_subscription(
        &self,
        subscription: &NewPriceSubscription,
    ) -> Result<PriceSubscription, RepositoryError>;

    /// Stamp `notified_at`, optionally deactivating the subscription.
    async fn mark_notified(&self, id: Uuid, deactivate: bool) -> Result<(), RepositoryError>;

    /// Deactivate a subscription. Returns `false` if it does not exist.
    async fn deactivate_subscription(&self, id: Uuid) -> Result<bool, RepositoryError>;
}

/// Raw subscription row; `kind` is stored as text.
#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    email: Email,
    product_id: ProductId,
    variant_id: Option<VariantId>,
    kind: String,
    target_price: Option<Decimal>,
    active: bool,
    created_at: DateTime<Utc>,
    notified_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubscriptionRow> for PriceSubscription {
    type Error = RepositoryError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            email: row.email,
            product_id: row.product_id,
            variant_id: row.variant_id,
            kind: row.kind.parse().map_err(RepositoryError::DataCorruption)?,
            target_price: row.target_price,
            active: row.active,
            created_at: row.created_at,
            notified_at: row.notified_at,
        })
    }
}

const SNAPSHOT_COLUMNS: &str =
    "id, product_id, variant_id, price, compare_at_price, available, recorded_at";
const SUBSCRIPTION_COLUMNS: &str =
    "id, email, product_id, variant_id, kind, target_price, active, created_at, notified_at";

/// `PostgreSQL`-backed price store.
#[derive(Clone)]
pub struct PgPriceStore {
    pool: PgPool,
}

impl PgPriceStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceStore for PgPriceStore {
    #[instrument(skip(self))]
    async fn latest_snapshot(
        &self,
        variant_id: VariantId,
    ) -> Result<Option<PriceSnapshot>, RepositoryError> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM price_snapshots \
             WHERE variant_id = $1 \
             ORDER BY recorded_at DESC, id DESC \
             LIMIT 1"
        );
        Ok(sqlx::query_as::<_, PriceSnapshot>(&sql)
            .bind(variant_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    #[instrument(skip(self, snapshot), fields(variant_id = %snapshot.variant_id))]
    async fn record_snapshot(
        &self,
        snapshot: &NewPriceSnapshot,
    ) -> Result<PriceSnapshot, RepositoryError> {
        let sql = format!(
            "INSERT INTO price_snapshots \
             (product_id, variant_id, price, compare_at_price, available) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {SNAPSHOT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, PriceSnapshot>(&sql)
            .bind(snapshot.product_id)
            .bind(snapshot.variant_id)
            .bind(snapshot.price)
            .bind(snapshot.compare_at_price)
            .bind(snapshot.available)
            .fetch_one(&self.pool)
            .await?)
    }

    #[instrument(skip(self))]
    async fn active_subscriptions(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<PriceSubscription>, RepositoryError> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM price_subscriptions \
             WHERE product_id = $1 AND active \
             ORDER BY created_at"
        );
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(PriceSubscription::try_from)
            .collect()
    }

    #[instrument(skip(self, subscription), fields(product_id = %subscription.product_id, kind = %subscription.kind))]
    async fn create_subscription(
        &self,
        subscription: &NewPriceSubscription,
    ) -> Result<PriceSubscription, RepositoryError> {
        let sql = format!(
            "INSERT INTO price_subscriptions \
             (id, email, product_id, variant_id, kind, target_price) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );
        sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&subscription.email)
            .bind(subscription.product_id)
            .bind(subscription.variant_id)
            .bind(subscription.kind.to_string())
            .bind(subscription.target_price)
            .fetch_one(&self.pool)
            .await?
            .try_into()
    }

    #[instrument(skip(self))]
    async fn mark_notified(&self, id: Uuid, deactivate: bool) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE price_subscriptions \
             SET notified_at = NOW(), active = active AND NOT $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(deactivate)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deactivate_subscription(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE price_subscriptions SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn snapshot(price: i64, available: bool) -> PriceSnapshot {
        PriceSnapshot {
            id: 1,
            product_id: ProductId::new(1),
            variant_id: VariantId::new(2),
            price: Decimal::new(price, 2),
            compare_at_price: None,
            available,
            recorded_at: Utc::now(),
        }
    }

    fn new_snapshot(price: i64, available: bool) -> NewPriceSnapshot {
        NewPriceSnapshot {
            product_id: ProductId::new(1),
            variant_id: VariantId::new(2),
            price: Decimal::new(price, 2),
            compare_at_price: None,
            available,
        }
    }

    #[test]
    fn test_differs_from() {
        assert!(!new_snapshot(1000, true).differs_from(&snapshot(1000, true)));
        assert!(new_snapshot(900, true).differs_from(&snapshot(1000, true)));
        assert!(new_snapshot(1000, false).differs_from(&snapshot(1000, true)));
        // Scale differences are not a price change
        let mut same = new_snapshot(1000, true);
        same.price = Decimal::new(10, 0);
        assert!(!same.differs_from(&snapshot(1000, true)));
    }

    #[test]
    fn test_row_with_bad_kind_is_corruption() {
        let row = SubscriptionRow {
            id: Uuid::new_v4(),
            email: Email::parse("a@b.c").unwrap(),
            product_id: ProductId::new(1),
            variant_id: None,
            kind: "SOMETIMES".to_string(),
            target_price: None,
            active: true,
            created_at: Utc::now(),
            notified_at: None,
        };
        assert!(matches!(
            PriceSubscription::try_from(row),
            Err(RepositoryError::DataCorruption(_))
        ));
    }

    #[test]
    fn test_product_wide_subscription_watches_all_variants() {
        let mut subscription = PriceSubscription {
            id: Uuid::new_v4(),
            email: Email::parse("a@b.c").unwrap(),
            product_id: ProductId::new(1),
            variant_id: None,
            kind: SubscriptionKind::AnyChange,
            target_price: None,
            active: true,
            created_at: Utc::now(),
            notified_at: None,
        };
        assert!(subscription.watches(VariantId::new(99)));
        subscription.variant_id = Some(VariantId::new(2));
        assert!(subscription.watches(VariantId::new(2)));
        assert!(!subscription.watches(VariantId::new(3)));
    }
}
