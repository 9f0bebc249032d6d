//! Decision model: what the dispatcher does with a failed or expired job.
//!
//! This module defines the Decision type (what to do next) and the Decider trait
//! (how to determine it from the job's attempt history).

use std::time::Duration;

use super::ids::JobId;
use crate::queue::RetryPolicy;

/// A job parked by the queue store until the dispatcher rules on it.
///
/// `attempt_count` already includes the failure that parked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCandidate {
    pub job_id: JobId,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error: String,
}

/// The next action to take for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Make the job eligible again after `delay`.
    Retry { delay: Duration, reason: String },

    /// Give up and dead-letter the job.
    MarkDead { reason: String },
}

/// Trait for deciding the next action for a parked job.
///
/// Deciders are pure: they never touch the stores. The dispatcher applies the
/// returned decision.
pub trait Decider: Send + Sync {
    fn decide(&self, candidate: &RetryCandidate) -> Decision;
}

/// Attempt-based retry with exponential backoff:
/// - retry while attempt_count < max_attempts
/// - dead once attempt_count >= max_attempts
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, candidate: &RetryCandidate) -> Decision {
        if candidate.attempt_count >= candidate.max_attempts {
            Decision::MarkDead {
                reason: format!(
                    "max attempts reached ({}/{}): {}",
                    candidate.attempt_count, candidate.max_attempts, candidate.last_error
                ),
            }
        } else {
            let delay = self.retry_policy.next_delay(candidate.attempt_count);
            Decision::Retry {
                delay,
                reason: format!(
                    "retry attempt {}/{} after {:?}: {}",
                    candidate.attempt_count + 1,
                    candidate.max_attempts,
                    delay,
                    candidate.last_error
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn candidate(attempt_count: u32, max_attempts: u32) -> RetryCandidate {
        RetryCandidate {
            job_id: JobId::generate(),
            attempt_count,
            max_attempts,
            last_error: "boom".to_string(),
        }
    }

    fn decider() -> DefaultDecider {
        DefaultDecider::new(RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        })
    }

    #[rstest]
    #[case::first_failure(1, 3)]
    #[case::second_failure(2, 3)]
    fn retries_below_limit(#[case] attempts: u32, #[case] max: u32) {
        let decision = decider().decide(&candidate(attempts, max));
        assert!(matches!(decision, Decision::Retry { .. }));
    }

    #[rstest]
    #[case::at_limit(3, 3)]
    #[case::single_attempt(1, 1)]
    fn dead_at_limit(#[case] attempts: u32, #[case] max: u32) {
        match decider().decide(&candidate(attempts, max)) {
            Decision::MarkDead { reason } => assert!(reason.contains("boom")),
            other => panic!("expected MarkDead, got {other:?}"),
        }
    }

    #[test]
    fn retry_delay_follows_policy() {
        let d = decider();
        let Decision::Retry { delay, .. } = d.decide(&candidate(2, 5)) else {
            panic!("expected retry");
        };
        assert_eq!(delay, d.retry_policy().next_delay(2));
    }
}
