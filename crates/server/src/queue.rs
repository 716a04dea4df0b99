//! Job queues with retry and dead-lettering.
//!
//! A [`JobQueue`] is a named, cloneable handle producers enqueue onto. Every
//! job is written to the [`JobStore`] before it is dispatched, and the row
//! stays until the job succeeds or is dead-lettered. A [`Worker`] drains the
//! matching [`JobReceiver`] with a fixed number of concurrent handlers. A
//! failed job is rescheduled after an exponential backoff until it has used
//! all its attempts, then written to the [`FailedJobStore`].
//!
//! Each stored job carries a lease. Workers periodically claim jobs whose
//! lease ran out, which recovers work left behind by a crash or by a
//! shutdown during backoff. Delivery is at least once: a job that outlives
//! its lease can run twice.
//!
//! Jobs are not ordered relative to each other and nothing serializes work
//! per order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::db::{FailedJob, FailedJobStore, JobStore, MappingError, RepositoryError, StoredJob};
use crate::esputnik::EsputnikError;
use crate::keycrm::KeycrmError;
use crate::shopify::ShopifyError;

/// Queue of Shopify orders to push into keyCRM.
pub const SHOPIFY_ORDERS: &str = "shopify-orders";
/// Queue of order lifecycle events for eSputnik.
pub const ESPUTNIK_ORDERS: &str = "esputnik-orders";
/// Queue of product updates for price tracking.
pub const PRICE_TRACKING: &str = "price-tracking";

/// Upper bound on handlers per worker.
pub const MAX_QUEUE_CONCURRENCY: usize = 1024;

/// How long a process owns a job it enqueued, claimed or rescheduled.
pub const LEASE: Duration = Duration::from_secs(10 * 60);

/// How often a worker claims jobs with an expired lease.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// Most jobs claimed per sweep.
const RECLAIM_BATCH: u32 = 100;

/// Errors from enqueueing. The job was not stored.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to serialize job for {queue}: {source}")]
    Serialize {
        queue: &'static str,
        source: serde_json::Error,
    },

    #[error("failed to store job for {queue}: {source}")]
    Store {
        queue: &'static str,
        source: RepositoryError,
    },
}

/// Why a job handler failed. Any variant triggers a retry.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Shopify error: {0}")]
    Shopify(#[from] ShopifyError),

    #[error("keyCRM error: {0}")]
    Keycrm(#[from] KeycrmError),

    #[error("eSputnik error: {0}")]
    Esputnik(#[from] EsputnikError),

    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `delay * 2^(attempt - 1)` after the n-th failed attempt.
    Exponential { delay: Duration },
}

impl Backoff {
    /// Delay before the next attempt, given the 1-based attempt that failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential { delay } => {
                let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
                delay.saturating_mul(factor)
            }
        }
    }
}

/// Retry policy of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::Exponential {
                delay: Duration::from_secs(5),
            },
        }
    }
}

/// A queued unit of work.
#[derive(Debug)]
pub struct Job<J> {
    pub id: Uuid,
    /// Attempts already made.
    pub attempt: u32,
    pub payload: J,
}

/// Processes jobs of one payload type.
#[async_trait]
pub trait JobHandler<J: Send + Sync>: Send + Sync {
    async fn process(&self, job: &J) -> Result<(), JobError>;
}

/// Producer handle for a named queue.
pub struct JobQueue<J> {
    name: &'static str,
    options: JobOptions,
    sender: mpsc::UnboundedSender<Job<J>>,
    store: Arc<dyn JobStore>,
}

impl<J> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            options: self.options,
            sender: self.sender.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

/// Consumer side of a queue, handed to a [`Worker`].
pub struct JobReceiver<J> {
    receiver: mpsc::UnboundedReceiver<Job<J>>,
}

#[cfg(any(test, feature = "test-support"))]
impl<J> JobReceiver<J> {
    /// Take every job currently waiting, without a worker.
    pub fn drain(&mut self) -> Vec<Job<J>> {
        std::iter::from_fn(|| self.receiver.try_recv().ok()).collect()
    }
}

/// Create a queue backed by `store` and its receiver.
#[must_use]
pub fn channel<J>(
    name: &'static str,
    options: JobOptions,
    store: Arc<dyn JobStore>,
) -> (JobQueue<J>, JobReceiver<J>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        JobQueue {
            name,
            options,
            sender,
            store,
        },
        JobReceiver { receiver },
    )
}

/// `from + delay`, saturating at the latest representable time.
fn after(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl<J> JobQueue<J> {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn options(&self) -> JobOptions {
        self.options
    }

    /// Hand a job to the local worker. A stopped worker leaves the stored
    /// row for the next claim.
    fn dispatch(&self, job: Job<J>) {
        if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
            warn!(queue = self.name, job_id = %job.id, "Worker stopped; job left in store");
        }
    }
}

impl<J: Send + 'static> JobQueue<J> {
    /// Dispatch after `delay`.
    fn schedule(&self, job: Job<J>, delay: Duration) {
        if delay.is_zero() {
            self.dispatch(job);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.dispatch(job);
        });
    }
}

impl<J: Serialize> JobQueue<J> {
    /// Store a job and dispatch it. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the job could not be stored; nothing was
    /// queued in that case.
    pub async fn enqueue(&self, payload: J) -> Result<Uuid, QueueError> {
        let now = Utc::now();
        let stored = StoredJob {
            id: Uuid::new_v4(),
            queue: self.name.to_string(),
            payload: serde_json::to_value(&payload).map_err(|source| QueueError::Serialize {
                queue: self.name,
                source,
            })?,
            attempts: 0,
            run_at: now,
            locked_until: after(now, LEASE),
        };
        self.store
            .insert(&stored)
            .await
            .map_err(|source| QueueError::Store {
                queue: self.name,
                source,
            })?;

        self.dispatch(Job {
            id: stored.id,
            attempt: 0,
            payload,
        });
        debug!(queue = self.name, job_id = %stored.id, "Job enqueued");
        Ok(stored.id)
    }
}

/// Fixed-concurrency consumer of one queue.
pub struct Worker<J, H> {
    queue: JobQueue<J>,
    receiver: JobReceiver<J>,
    handler: Arc<H>,
    dead_letters: Arc<dyn FailedJobStore>,
    concurrency: usize,
}

impl<J, H> Worker<J, H>
where
    J: Serialize + DeserializeOwned + Send + Sync + 'static,
    H: JobHandler<J> + 'static,
{
    /// `queue` is used to schedule retries onto the same queue.
    pub fn new(
        queue: JobQueue<J>,
        receiver: JobReceiver<J>,
        handler: Arc<H>,
        dead_letters: Arc<dyn FailedJobStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            receiver,
            handler,
            dead_letters,
            concurrency: concurrency.clamp(1, MAX_QUEUE_CONCURRENCY),
        }
    }

    /// Run on a background task until `shutdown` flips to `true`.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Pull jobs until shutdown, then wait for in-flight jobs.
    ///
    /// Retries still sleeping at shutdown stay in the store and are claimed
    /// once their lease expires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            queue,
            mut receiver,
            handler,
            dead_letters,
            concurrency,
        } = self;
        let name = queue.name();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut reclaim = tokio::time::interval(RECLAIM_INTERVAL);
        reclaim.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(queue = name, concurrency, "Worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = reclaim.tick() => {
                    reclaim_expired(&queue, dead_letters.as_ref()).await;
                    continue;
                }
                job = receiver.receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let queue = queue.clone();
            let handler = Arc::clone(&handler);
            let dead_letters = Arc::clone(&dead_letters);
            let span = info_span!("job", queue = name, job_id = %job.id, attempt = job.attempt + 1);

            tokio::spawn(
                async move {
                    run_job(job, &queue, handler.as_ref(), dead_letters.as_ref()).await;
                    drop(permit);
                }
                .instrument(span),
            );
        }

        // Wait for every in-flight handler to hand its permit back
        let all = u32::try_from(concurrency).unwrap_or(u32::MAX);
        let _ = semaphore.acquire_many(all).await;
        info!(queue = name, "Worker stopped");
    }
}

/// Claim stored jobs whose lease expired and dispatch them at their
/// scheduled time.
async fn reclaim_expired<J>(queue: &JobQueue<J>, dead_letters: &dyn FailedJobStore)
where
    J: DeserializeOwned + Send + 'static,
{
    let now = Utc::now();
    let claimed = match queue
        .store
        .claim_expired(queue.name, RECLAIM_BATCH, after(now, LEASE))
        .await
    {
        Ok(claimed) => claimed,
        Err(e) => {
            warn!(queue = queue.name, error = %e, "Failed to claim expired jobs");
            return;
        }
    };

    for stored in claimed {
        match serde_json::from_value::<J>(stored.payload.clone()) {
            Ok(payload) => {
                info!(queue = queue.name, job_id = %stored.id, attempts = stored.attempts, "Reclaimed stored job");
                let delay = (stored.run_at - now).to_std().unwrap_or_default();
                queue.schedule(
                    Job {
                        id: stored.id,
                        attempt: stored.attempts,
                        payload,
                    },
                    delay,
                );
            }
            Err(e) => {
                error!(queue = queue.name, job_id = %stored.id, error = %e, "Stored job payload is unreadable");
                let failed = FailedJob {
                    id: stored.id,
                    queue: stored.queue,
                    payload: stored.payload,
                    attempts: stored.attempts,
                    last_error: format!("unreadable payload: {e}"),
                    failed_at: now,
                };
                bury(queue, dead_letters, &failed).await;
            }
        }
    }
}

/// Dead-letter a job and drop it from the queue store. The stored row is
/// kept when the dead letter cannot be written.
async fn bury<J>(queue: &JobQueue<J>, dead_letters: &dyn FailedJobStore, failed: &FailedJob) {
    if let Err(e) = dead_letters.record(failed).await {
        error!(job_id = %failed.id, error = %e, "Failed to record dead letter");
        return;
    }
    if let Err(e) = queue.store.complete(failed.id).await {
        warn!(job_id = %failed.id, error = %e, "Failed to remove dead-lettered job");
    }
}

async fn run_job<J, H>(
    job: Job<J>,
    queue: &JobQueue<J>,
    handler: &H,
    dead_letters: &dyn FailedJobStore,
) where
    J: Serialize + Send + Sync + 'static,
    H: JobHandler<J>,
{
    let attempt = job.attempt + 1;
    let options = queue.options();

    match handler.process(&job.payload).await {
        Ok(()) => {
            if let Err(e) = queue.store.complete(job.id).await {
                warn!(error = %e, "Failed to remove completed job");
            }
            debug!("Job completed");
        }
        Err(err) if attempt < options.attempts => {
            let delay = options.backoff.delay_for(attempt);
            let run_at = after(Utc::now(), delay);
            warn!(
                error = %err,
                retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Job failed, scheduling retry"
            );
            if let Err(e) = queue
                .store
                .reschedule(job.id, attempt, run_at, after(run_at, LEASE), &err.to_string())
                .await
            {
                warn!(error = %e, "Failed to store retry");
            }
            queue.schedule(Job { attempt, ..job }, delay);
        }
        Err(err) => {
            error!(error = %err, attempts = attempt, "Job failed permanently");
            let failed = FailedJob {
                id: job.id,
                queue: queue.name().to_string(),
                payload: serde_json::to_value(&job.payload).unwrap_or_default(),
                attempts: attempt,
                last_error: err.to_string(),
                failed_at: Utc::now(),
            };
            bury(queue, dead_letters, &failed).await;
        }
    }
}
