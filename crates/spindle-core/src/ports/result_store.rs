//! ResultStore port - terminal job records with expiry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{JobId, JobRecord, JobStatus, StoreError};

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store a terminal record. Idempotent: once a job has a record, later
    /// puts leave it untouched.
    async fn put(&self, record: JobRecord) -> Result<(), StoreError>;

    /// Status of a job; `Unknown` when there is no record.
    async fn get(&self, job_id: JobId) -> Result<JobStatus, StoreError>;

    /// Drop records completed before `older_than`. Returns how many went.
    async fn expire(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Wait up to `timeout` for a terminal record to show up.
    async fn wait_for(&self, job_id: JobId, timeout: Duration) -> Result<JobStatus, StoreError>;

    async fn close(&self);
}
