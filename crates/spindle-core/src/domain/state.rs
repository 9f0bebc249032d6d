//! Job state machine.

use serde::{Deserialize, Serialize};

/// State of a job as reported to pollers.
///
/// State transitions:
/// - Pending -> Running -> Succeeded
/// - Pending -> Running -> Pending (requeued, retry scheduled or lease expired)
/// - Pending -> Running -> Failed (non-retryable failure or cancellation)
/// - Pending -> Running -> Dead (attempts exhausted)
/// - Pending -> Failed (cancelled before lease)
///
/// `Unknown` is never stored: it is what a lookup reports for an id nobody
/// has recorded (never submitted, or already garbage-collected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Dead,
    Unknown,
}

impl JobState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Dead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
            JobState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
