//! JobEnvelope - one unit of work as the queue sees it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::task_type::TaskType;

/// Scheduling priority. A larger value is leased first; jobs of equal
/// priority are served oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOW: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(5);
    pub const HIGH: Priority = Priority(9);
}

impl From<u8> for Priority {
    fn from(p: u8) -> Self {
        Priority(p)
    }
}

/// Identity, task type, payload and retry policy of a job.
///
/// Everything is fixed at construction except `attempt_count`, which only the
/// queue store advances (one step per failed attempt or expired lease).
#[derive(Debug, Clone)]
pub struct JobEnvelope {
    id: JobId,
    task_type: TaskType,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    priority: Priority,
    max_attempts: u32,
    attempt_count: u32,
    visibility_timeout: Option<Duration>,
}

impl JobEnvelope {
    pub fn new(
        id: JobId,
        task_type: TaskType,
        payload: impl Into<Vec<u8>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            payload: payload.into(),
            created_at,
            priority: Priority::default(),
            max_attempts: 1,
            attempt_count: 0,
            visibility_timeout: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// `max_attempts` is clamped to at least one attempt.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Per-job lease duration; jobs without one use the timeout the worker
    /// asks for when leasing.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn visibility_timeout(&self) -> Option<Duration> {
        self.visibility_timeout
    }

    /// Have all allowed attempts been used up?
    pub fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Count one failed attempt. Saturates at `max_attempts`.
    pub(crate) fn record_failed_attempt(&mut self) {
        if self.attempt_count < self.max_attempts {
            self.attempt_count += 1;
        }
    }
}
