//! QueueStore port - pending jobs, leases and the retry hand-off.
//!
//! Any backend with atomic compare-and-swap (or transactions) can implement
//! this; `queue::InMemoryQueueStore` is the reference implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    DeadLetter, JobEnvelope, JobId, LeaseRenewal, LeasedJob, RetryCandidate, StoreError,
    WorkerToken,
};
use crate::queue::{QueueJobState, QueueStats};

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job had not been leased; it is removed from the queue.
    Cancelled { attempts: u32 },

    /// The job is running or already finished. Running jobs get the
    /// cancellation flag (seen by the worker on its next renew); nothing else
    /// changes.
    NotCancellable(QueueJobState),
}

/// Queue store contract.
///
/// Every mutating call is atomic with respect to concurrent `lease` calls:
/// no two live leases can exist for one job.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Add a job. Fails with `DuplicateId` while an entry with the same id
    /// exists (until `purge` drops it).
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<JobId, StoreError>;

    /// Lease the highest-priority, oldest eligible job, or `Ok(None)` when
    /// nothing is eligible.
    ///
    /// `visibility_timeout` applies to jobs whose envelope carries none.
    async fn lease(
        &self,
        worker_token: WorkerToken,
        visibility_timeout: Duration,
    ) -> Result<Option<LeasedJob>, StoreError>;

    /// Return once new work may be eligible, or after `timeout`.
    async fn wait_for_work(&self, timeout: Duration);

    /// `lease`, waiting up to `wait` for a job to become eligible.
    async fn lease_wait(
        &self,
        worker_token: WorkerToken,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Result<Option<LeasedJob>, StoreError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(job) = self.lease(worker_token, visibility_timeout).await? {
                return Ok(Some(job));
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.wait_for_work(remaining).await;
        }
    }

    /// Mark the job done in the queue. The terminal record lives in the
    /// result store. Acking again with the token that already acked is a no-op.
    async fn ack(&self, job_id: JobId, worker_token: WorkerToken) -> Result<(), StoreError>;

    /// Release the lease. `requeue = true` makes the job eligible right away
    /// without counting an attempt; otherwise the failure is counted and the
    /// job waits for the dispatcher.
    async fn nack(
        &self,
        job_id: JobId,
        worker_token: WorkerToken,
        requeue: bool,
        reason: &str,
    ) -> Result<(), StoreError>;

    /// Push the lease expiry to `now + extension`.
    async fn renew(
        &self,
        job_id: JobId,
        worker_token: WorkerToken,
        extension: Duration,
    ) -> Result<LeaseRenewal, StoreError>;

    async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, StoreError>;

    /// Queue-side state of a job, `None` if unknown or purged.
    async fn state(&self, job_id: JobId) -> Result<Option<QueueJobState>, StoreError>;

    // ---- dispatcher operations ----

    /// Reclaim every lease that has expired: count the attempt and park the
    /// job for a decision. Returns the reclaimed ids.
    async fn reap_expired(&self) -> Result<Vec<JobId>, StoreError>;

    /// Jobs waiting for a retry decision.
    async fn awaiting_decision(&self) -> Result<Vec<RetryCandidate>, StoreError>;

    /// Make a parked job eligible again from `not_before` on.
    async fn schedule_retry(
        &self,
        job_id: JobId,
        not_before: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Move a parked job to the dead state.
    async fn bury(&self, job_id: JobId, reason: &str) -> Result<DeadLetter, StoreError>;

    // ---- housekeeping ----

    /// Drop finished entries last touched before `older_than`.
    async fn purge(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn stats(&self) -> Result<QueueStats, StoreError>;

    /// End of lifecycle; later calls fail with `StoreUnavailable`.
    async fn close(&self);
}
