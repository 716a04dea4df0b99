//! Order id mapping store.
//!
//! One row joins the three order id spaces. Rows are created when a Shopify
//! order is first seen, gain their keyCRM id once the CRM push succeeds, and
//! are read on every keyCRM status webhook. Nothing deletes them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use storelink_core::{KeycrmOrderId, LocalOrderId, ShopifyOrderId};
use thiserror::Error;
use tracing::instrument;

use super::is_unique_violation;

/// A row of `order_mappings`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OrderMapping {
    pub local_order_id: LocalOrderId,
    pub shopify_order_id: ShopifyOrderId,
    pub keycrm_order_id: Option<KeycrmOrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Errors returned by [`OrderMappingStore`].
#[derive(Debug, Error)]
pub enum MappingError {
    /// A mapping already exists for this local or Shopify order.
    #[error("mapping for local order {0} already exists")]
    DuplicateMapping(LocalOrderId),

    #[error("no mapping for local order {0}")]
    MappingNotFound(LocalOrderId),

    /// A different keyCRM id is already attached.
    #[error("local order {local_order_id} is already linked to keyCRM order {existing}")]
    AlreadyAttached {
        local_order_id: LocalOrderId,
        existing: KeycrmOrderId,
    },

    /// The keyCRM id is attached to another mapping.
    #[error("keyCRM order {0} is already linked to another order")]
    KeycrmIdTaken(KeycrmOrderId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence for [`OrderMapping`] rows.
#[async_trait]
pub trait OrderMappingStore: Send + Sync {
    /// Insert a mapping without a keyCRM id.
    async fn create(
        &self,
        local_order_id: LocalOrderId,
        shopify_order_id: &ShopifyOrderId,
    ) -> Result<OrderMapping, MappingError>;

    /// Attach the keyCRM id. Attaching the id already present is a no-op.
    async fn attach_keycrm_id(
        &self,
        local_order_id: LocalOrderId,
        keycrm_order_id: KeycrmOrderId,
    ) -> Result<OrderMapping, MappingError>;

    async fn find_by_keycrm_id(
        &self,
        keycrm_order_id: KeycrmOrderId,
    ) -> Result<Option<OrderMapping>, MappingError>;

    async fn find_by_local_id(
        &self,
        local_order_id: LocalOrderId,
    ) -> Result<Option<OrderMapping>, MappingError>;

    async fn find_by_shopify_id(
        &self,
        shopify_order_id: &ShopifyOrderId,
    ) -> Result<Option<OrderMapping>, MappingError>;
}

const COLUMNS: &str =
    "local_order_id, shopify_order_id, keycrm_order_id, created_at, updated_at";

/// `PostgreSQL`-backed mapping store.
#[derive(Clone)]
pub struct PgOrderMappingStore {
    pool: PgPool,
}

impl PgOrderMappingStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderMappingStore for PgOrderMappingStore {
    #[instrument(skip(self), fields(local_order_id = %local_order_id, shopify_order_id = %shopify_order_id))]
    async fn create(
        &self,
        local_order_id: LocalOrderId,
        shopify_order_id: &ShopifyOrderId,
    ) -> Result<OrderMapping, MappingError> {
        let sql = format!(
            "INSERT INTO order_mappings (local_order_id, shopify_order_id) \
             VALUES ($1, $2) \
             ON CONFLICT DO NOTHING \
             RETURNING {COLUMNS}"
        );

        sqlx::query_as::<_, OrderMapping>(&sql)
            .bind(local_order_id)
            .bind(shopify_order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(MappingError::DuplicateMapping(local_order_id))
    }

    #[instrument(skip(self), fields(local_order_id = %local_order_id, keycrm_order_id = %keycrm_order_id))]
    async fn attach_keycrm_id(
        &self,
        local_order_id: LocalOrderId,
        keycrm_order_id: KeycrmOrderId,
    ) -> Result<OrderMapping, MappingError> {
        let sql = format!(
            "UPDATE order_mappings \
             SET keycrm_order_id = $2, updated_at = NOW() \
             WHERE local_order_id = $1 \
               AND (keycrm_order_id IS NULL OR keycrm_order_id = $2) \
             RETURNING {COLUMNS}"
        );

        let updated = sqlx::query_as::<_, OrderMapping>(&sql)
            .bind(local_order_id)
            .bind(keycrm_order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    MappingError::KeycrmIdTaken(keycrm_order_id)
                } else {
                    MappingError::Database(e)
                }
            })?;

        if let Some(mapping) = updated {
            return Ok(mapping);
        }

        // Either the row is missing or it carries another keyCRM id
        match self.find_by_local_id(local_order_id).await? {
            None => Err(MappingError::MappingNotFound(local_order_id)),
            Some(existing) => Err(MappingError::AlreadyAttached {
                local_order_id,
                existing: existing.keycrm_order_id.unwrap_or(keycrm_order_id),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_keycrm_id(
        &self,
        keycrm_order_id: KeycrmOrderId,
    ) -> Result<Option<OrderMapping>, MappingError> {
        let sql = format!("SELECT {COLUMNS} FROM order_mappings WHERE keycrm_order_id = $1");
        Ok(sqlx::query_as::<_, OrderMapping>(&sql)
            .bind(keycrm_order_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    #[instrument(skip(self))]
    async fn find_by_local_id(
        &self,
        local_order_id: LocalOrderId,
    ) -> Result<Option<OrderMapping>, MappingError> {
        let sql = format!("SELECT {COLUMNS} FROM order_mappings WHERE local_order_id = $1");
        Ok(sqlx::query_as::<_, OrderMapping>(&sql)
            .bind(local_order_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    #[instrument(skip(self))]
    async fn find_by_shopify_id(
        &self,
        shopify_order_id: &ShopifyOrderId,
    ) -> Result<Option<OrderMapping>, MappingError> {
        let sql = format!("SELECT {COLUMNS} FROM order_mappings WHERE shopify_order_id = $1");
        Ok(sqlx::query_as::<_, OrderMapping>(&sql)
            .bind(shopify_order_id)
            .fetch_optional(&self.pool)
            .await?)
    }
}
