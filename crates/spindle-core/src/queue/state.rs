//! Queue-side state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::JobState;

/// State of an entry inside the queue store.
///
/// State transitions:
/// - Pending -> Running -> Completed (ack)
/// - Pending -> Running -> Pending (nack with requeue, or lease expiry noticed by `lease`)
/// - Pending -> Running -> AwaitingDecision (nack without requeue, or reaped expiry)
/// - AwaitingDecision -> Scheduled -> Pending (retry after backoff)
/// - AwaitingDecision -> Dead
/// - Pending / Scheduled / AwaitingDecision -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueueJobState {
    /// Ready to lease.
    Pending,

    /// Waiting out a retry delay.
    Scheduled { not_before: DateTime<Utc> },

    /// Leased by a worker.
    Running { expires_at: DateTime<Utc> },

    /// Failed attempt counted; the dispatcher has not ruled yet.
    AwaitingDecision,

    /// Acked.
    Completed,

    /// Attempts exhausted.
    Dead,

    /// Removed before it was ever leased again.
    Cancelled,
}

impl QueueJobState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueJobState::Completed | QueueJobState::Dead | QueueJobState::Cancelled
        )
    }

    /// Can a cancellation still remove the job?
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            QueueJobState::Pending
                | QueueJobState::Scheduled { .. }
                | QueueJobState::AwaitingDecision
        )
    }

    /// How pollers see this state when there is no terminal record.
    ///
    /// A completed job whose record has not landed yet still counts as
    /// running.
    pub fn as_job_state(self) -> JobState {
        match self {
            QueueJobState::Pending
            | QueueJobState::Scheduled { .. }
            | QueueJobState::AwaitingDecision => JobState::Pending,
            QueueJobState::Running { .. } | QueueJobState::Completed => JobState::Running,
            QueueJobState::Dead => JobState::Dead,
            QueueJobState::Cancelled => JobState::Failed,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QueueJobState::Pending => "pending",
            QueueJobState::Scheduled { .. } => "scheduled",
            QueueJobState::Running { .. } => "running",
            QueueJobState::AwaitingDecision => "awaiting_decision",
            QueueJobState::Completed => "completed",
            QueueJobState::Dead => "dead",
            QueueJobState::Cancelled => "cancelled",
        }
    }
}

/// Per-state entry counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub scheduled: usize,
    pub running: usize,
    pub awaiting_decision: usize,
    pub completed: usize,
    pub dead: usize,
    pub cancelled: usize,
}

impl QueueStats {
    pub fn record(&mut self, state: QueueJobState) {
        match state {
            QueueJobState::Pending => self.pending += 1,
            QueueJobState::Scheduled { .. } => self.scheduled += 1,
            QueueJobState::Running { .. } => self.running += 1,
            QueueJobState::AwaitingDecision => self.awaiting_decision += 1,
            QueueJobState::Completed => self.completed += 1,
            QueueJobState::Dead => self.dead += 1,
            QueueJobState::Cancelled => self.cancelled += 1,
        }
    }

    /// Entries that still need work.
    pub fn outstanding(&self) -> usize {
        self.pending + self.scheduled + self.running + self.awaiting_decision
    }
}
