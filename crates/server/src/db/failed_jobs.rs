//! Dead-letter storage for jobs that ran out of attempts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::RepositoryError;

/// A job that exhausted its attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedJob {
    pub id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait FailedJobStore: Send + Sync {
    async fn record(&self, job: &FailedJob) -> Result<(), RepositoryError>;
}

/// `PostgreSQL`-backed dead-letter store.
#[derive(Clone)]
pub struct PgFailedJobStore {
    pool: PgPool,
}

impl PgFailedJobStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailedJobStore for PgFailedJobStore {
    #[instrument(skip(self, job), fields(queue = %job.queue, job_id = %job.id))]
    async fn record(&self, job: &FailedJob) -> Result<(), RepositoryError> {
        let attempts = i32::try_from(job.attempts)
            .map_err(|_| RepositoryError::DataCorruption("attempt count overflow".to_string()))?;

        sqlx::query(
            "INSERT INTO failed_jobs (id, queue, payload, attempts, last_error, failed_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(job.id)
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(attempts)
        .bind(&job.last_error)
        .bind(job.failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
