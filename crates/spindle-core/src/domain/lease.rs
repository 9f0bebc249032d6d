//! Lease - a time-bounded exclusive claim on one job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::JobEnvelope;
use super::ids::{JobId, WorkerToken};

/// Lease record. The queue store owns it; workers only hold the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: JobId,
    pub worker_token: WorkerToken,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// A lease is expired from `expires_at` on (inclusive).
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_held_by(&self, token: WorkerToken) -> bool {
        self.worker_token == token
    }
}

/// What `lease` hands to a worker: a snapshot of the envelope plus the lease.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub envelope: JobEnvelope,
    pub lease: Lease,
}

impl LeasedJob {
    pub fn job_id(&self) -> JobId {
        self.envelope.id()
    }

    pub fn token(&self) -> WorkerToken {
        self.lease.worker_token
    }

    /// 1-based number of the attempt this lease runs.
    pub fn attempt(&self) -> u32 {
        self.envelope.attempt_count() + 1
    }
}

/// Answer to a successful `renew`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRenewal {
    pub expires_at: DateTime<Utc>,
    /// Someone asked to cancel the job; the handler should stop cooperatively.
    pub cancel_requested: bool,
}
