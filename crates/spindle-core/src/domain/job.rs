//! Job record (terminal outcome) and the status view handed to pollers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::state::JobState;

/// Terminal outcome of a job, written once to the result store.
///
/// Design: constructors only exist for terminal states, so a stored record is
/// always succeeded / failed / dead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub state: JobState,

    /// Handler output (success only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,

    /// Failure reason (failed / dead only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Failed attempts counted before the outcome.
    pub attempts: u32,

    pub completed_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn succeeded(job_id: JobId, result: Vec<u8>, attempts: u32, at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            state: JobState::Succeeded,
            result: Some(result),
            error: None,
            attempts,
            completed_at: at,
        }
    }

    pub fn failed(
        job_id: JobId,
        reason: impl Into<String>,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            state: JobState::Failed,
            result: None,
            error: Some(reason.into()),
            attempts,
            completed_at: at,
        }
    }

    pub fn dead(job_id: JobId, reason: impl Into<String>, attempts: u32, at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            state: JobState::Dead,
            result: None,
            error: Some(reason.into()),
            attempts,
            completed_at: at,
        }
    }
}

/// Job status for pollers.
///
/// Never an error: ids nobody knows about come back as `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn unknown(job_id: JobId) -> Self {
        Self::in_flight(job_id, JobState::Unknown)
    }

    /// Status of a job with no terminal record yet.
    pub fn in_flight(job_id: JobId, state: JobState) -> Self {
        Self {
            job_id,
            state,
            result: None,
            error: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl From<JobRecord> for JobStatus {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            state: record.state,
            result: record.result,
            error: record.error,
            completed_at: Some(record.completed_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_constructors_are_terminal() {
        let id = JobId::generate();
        let now = Utc::now();

        assert!(JobRecord::succeeded(id, vec![1], 0, now).state.is_terminal());
        assert!(JobRecord::failed(id, "boom", 1, now).state.is_terminal());
        assert!(JobRecord::dead(id, "boom", 3, now).state.is_terminal());
    }

    #[test]
    fn status_from_record_keeps_outcome() {
        let id = JobId::generate();
        let status: JobStatus = JobRecord::dead(id, "max attempts", 3, Utc::now()).into();

        assert_eq!(status.state, JobState::Dead);
        assert_eq!(status.error.as_deref(), Some("max attempts"));
        assert!(status.result.is_none());
        assert!(status.is_terminal());
    }

    #[test]
    fn unknown_status_omits_optional_fields() {
        let v = serde_json::to_value(JobStatus::unknown(JobId::generate())).unwrap();
        assert_eq!(v["state"], "unknown");
        assert!(v.get("result").is_none());
        assert!(v.get("error").is_none());
    }
}
