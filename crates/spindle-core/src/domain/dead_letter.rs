//! DeadLetter - a job that exhausted its attempts.

use chrono::{DateTime, Utc};

use super::envelope::JobEnvelope;
use super::ids::JobId;

#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Envelope as it was when buried (attempt_count == max_attempts).
    pub envelope: JobEnvelope,
    /// Last failure or timeout reason.
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn job_id(&self) -> JobId {
        self.envelope.id()
    }

    pub fn attempts(&self) -> u32 {
        self.envelope.attempt_count()
    }
}
