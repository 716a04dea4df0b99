//! Database operations on `PostgreSQL`.
//!
//! ## Tables
//!
//! - `order_mappings` - local / Shopify / keyCRM order id triples
//! - `price_snapshots` - append-only variant price and availability history
//! - `price_subscriptions` - storefront price alert subscriptions
//! - `jobs` - queued and retrying jobs
//! - `failed_jobs` - queue dead letters
//!
//! # Migrations
//!
//! DDL lives in `crates/server/migrations/` and is applied out of band.
//!
//! Every store is a trait so the fanout engine and workers can run against
//! in-memory doubles; the `Pg*` types are the production implementations.

pub mod failed_jobs;
pub mod jobs;
pub mod order_mappings;
pub mod price_tracking;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use failed_jobs::{FailedJob, FailedJobStore, PgFailedJobStore};
pub use jobs::{JobStore, PgJobStore, StoredJob};
pub use order_mappings::{MappingError, OrderMapping, OrderMappingStore, PgOrderMappingStore};
pub use price_tracking::{
    NewPriceSnapshot, NewPriceSubscription, PgPriceStore, PriceSnapshot, PriceStore,
    PriceSubscription,
};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Whether a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
