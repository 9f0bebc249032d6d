//! Status - pollers 向けの状態の合成
//!
//! terminal record があればそれが正。なければ queue 側の状態から推定する。

use crate::domain::{JobId, JobState, JobStatus};
use crate::queue::QueueJobState;

/// Combine the result store's view with the queue's.
pub fn resolve(job_id: JobId, record: JobStatus, queue_state: Option<QueueJobState>) -> JobStatus {
    if record.is_terminal() {
        return record;
    }

    match queue_state {
        None => JobStatus::unknown(job_id),
        Some(QueueJobState::Cancelled) => JobStatus {
            error: Some("cancelled".to_string()),
            ..JobStatus::in_flight(job_id, JobState::Failed)
        },
        Some(state) => JobStatus::in_flight(job_id, state.as_job_state()),
    }
}
