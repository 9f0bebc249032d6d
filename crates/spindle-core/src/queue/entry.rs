//! Queue entry: envelope + queue-side bookkeeping.

use chrono::{DateTime, Utc};

use super::QueueJobState;
use crate::domain::{JobEnvelope, JobId, Lease, WorkerToken};

/// Envelope plus the state the store keeps for it.
///
/// Design:
/// - This is the single source of truth for a job inside the queue.
/// - Index structures (ready / scheduled / expiry) hold ids only and are
///   validated against the entry when popped.
/// - All state transitions happen here.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub envelope: JobEnvelope,
    pub state: QueueJobState,

    /// Current lease (Running only).
    pub lease: Option<Lease>,

    /// Token that acked the job; a repeat ack with it is a no-op.
    pub acked_by: Option<WorkerToken>,

    /// Last failure or timeout reason.
    pub last_error: Option<String>,

    /// Cancellation asked for while the job was running.
    pub cancel_requested: bool,

    /// Enqueue order, breaks ties between equal `created_at`.
    pub seq: u64,

    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(envelope: JobEnvelope, seq: u64, now: DateTime<Utc>) -> Self {
        Self {
            envelope,
            state: QueueJobState::Pending,
            lease: None,
            acked_by: None,
            last_error: None,
            cancel_requested: false,
            seq,
            updated_at: now,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.envelope.id()
    }

    /// Does `token` hold the current lease?
    pub fn is_leased_by(&self, token: WorkerToken) -> bool {
        matches!(self.state, QueueJobState::Running { .. })
            && self.lease.as_ref().is_some_and(|l| l.is_held_by(token))
    }

    /// Is the current lease (if any) expired at `now`?
    pub fn lease_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, QueueJobState::Running { .. })
            && self.lease.as_ref().is_some_and(|l| l.is_expired_at(now))
    }

    pub fn start_lease(&mut self, lease: Lease) {
        self.state = QueueJobState::Running {
            expires_at: lease.expires_at,
        };
        self.updated_at = lease.acquired_at;
        self.lease = Some(lease);
    }

    pub fn extend_lease(&mut self, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        if let Some(lease) = self.lease.as_mut() {
            lease.expires_at = expires_at;
        }
        self.state = QueueJobState::Running { expires_at };
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, token: WorkerToken, now: DateTime<Utc>) {
        self.state = QueueJobState::Completed;
        self.lease = None;
        self.acked_by = Some(token);
        self.updated_at = now;
    }

    /// Back to Pending without counting an attempt.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.state = QueueJobState::Pending;
        self.lease = None;
        self.updated_at = now;
    }

    /// Count a failed attempt and release the lease.
    pub fn record_failure(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.envelope.record_failed_attempt();
        self.last_error = Some(reason.into());
        self.lease = None;
        self.updated_at = now;
    }

    pub fn park(&mut self, now: DateTime<Utc>) {
        self.state = QueueJobState::AwaitingDecision;
        self.updated_at = now;
    }

    pub fn schedule(&mut self, not_before: DateTime<Utc>, now: DateTime<Utc>) {
        self.state = QueueJobState::Scheduled { not_before };
        self.updated_at = now;
    }

    pub fn mark_dead(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.state = QueueJobState::Dead;
        self.last_error = Some(reason.into());
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.state = QueueJobState::Cancelled;
        self.last_error = Some("cancelled".to_string());
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use chrono::TimeDelta;

    fn entry(max_attempts: u32) -> QueueEntry {
        let now = Utc::now();
        let env = JobEnvelope::new(JobId::generate(), TaskType::new("t"), b"{}".to_vec(), now)
            .with_max_attempts(max_attempts);
        QueueEntry::new(env, 1, now)
    }

    #[test]
    fn lease_ownership_follows_token() {
        let mut e = entry(3);
        let now = Utc::now();
        let mine = WorkerToken::generate();
        e.start_lease(Lease {
            job_id: e.job_id(),
            worker_token: mine,
            acquired_at: now,
            expires_at: now + TimeDelta::seconds(30),
        });

        assert!(e.is_leased_by(mine));
        assert!(!e.is_leased_by(WorkerToken::generate()));
        assert!(!e.lease_expired_at(now));
        assert!(e.lease_expired_at(now + TimeDelta::seconds(30)));
    }

    #[test]
    fn record_failure_counts_and_releases() {
        let mut e = entry(2);
        let now = Utc::now();
        e.record_failure("boom", now);
        e.park(now);

        assert_eq!(e.envelope.attempt_count(), 1);
        assert_eq!(e.state, QueueJobState::AwaitingDecision);
        assert!(e.lease.is_none());
        assert_eq!(e.last_error.as_deref(), Some("boom"));
    }
}
