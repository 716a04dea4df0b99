//! Durable storage for queued jobs.
//!
//! A row exists from enqueue until the job succeeds or is dead-lettered.
//! `locked_until` is a lease: while it lies in the future the job belongs to
//! the process that wrote it, and once it passes any worker may claim the
//! row. Enqueue and retry both take a fresh lease, so a process that dies
//! mid-job or mid-backoff leaves rows that are picked up after expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::RepositoryError;

/// A job row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub id: Uuid,
    pub queue: String,
    pub payload: serde_json::Value,
    /// Attempts already made.
    pub attempts: u32,
    /// Earliest time the next attempt may start.
    pub run_at: DateTime<Utc>,
    pub locked_until: DateTime<Utc>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &StoredJob) -> Result<(), RepositoryError>;

    /// Take over up to `limit` jobs of `queue` whose lease has expired,
    /// leasing them until `locked_until`.
    async fn claim_expired(
        &self,
        queue: &str,
        limit: u32,
        locked_until: DateTime<Utc>,
    ) -> Result<Vec<StoredJob>, RepositoryError>;

    /// Record a failed attempt and the time of the next one.
    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        run_at: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), RepositoryError>;

    /// Remove a finished (or dead-lettered) job.
    async fn complete(&self, id: Uuid) -> Result<(), RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    queue: String,
    payload: serde_json::Value,
    attempts: i32,
    run_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for StoredJob {
    type Error = RepositoryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            queue: row.queue,
            payload: row.payload,
            attempts: u32::try_from(row.attempts).map_err(|_| {
                RepositoryError::DataCorruption(format!("negative attempts on job {}", row.id))
            })?,
            run_at: row.run_at,
            locked_until: row.locked_until.unwrap_or(row.run_at),
        })
    }
}

fn attempts_column(attempts: u32) -> Result<i32, RepositoryError> {
    i32::try_from(attempts)
        .map_err(|_| RepositoryError::DataCorruption("attempt count overflow".to_string()))
}

/// `PostgreSQL`-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(queue = %job.queue, job_id = %job.id))]
    async fn insert(&self, job: &StoredJob) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO jobs (id, queue, payload, attempts, run_at, locked_until) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(job.id)
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(attempts_column(job.attempts)?)
        .bind(job.run_at)
        .bind(job.locked_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_expired(
        &self,
        queue: &str,
        limit: u32,
        locked_until: DateTime<Utc>,
    ) -> Result<Vec<StoredJob>, RepositoryError> {
        let rows = sqlx::query_as::<_, JobRow>(
            "UPDATE jobs SET locked_until = $3 \
             WHERE id IN ( \
                 SELECT id FROM jobs \
                 WHERE queue = $1 AND (locked_until IS NULL OR locked_until < NOW()) \
                 ORDER BY run_at \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, queue, payload, attempts, run_at, locked_until",
        )
        .bind(queue)
        .bind(i64::from(limit))
        .bind(locked_until)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredJob::try_from).collect()
    }

    #[instrument(skip(self, last_error))]
    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        run_at: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE jobs SET attempts = $2, run_at = $3, locked_until = $4, last_error = $5 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(attempts_column(attempts)?)
        .bind(run_at)
        .bind(locked_until)
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn complete(&self, id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
