//! Errors - エラー型と分類
//!
//! - `StoreError`: queue store / result store の契約違反と接続障害
//! - `HandlerError`: handler が返す業務エラー（retry するかどうかの材料）
//! - `ErrorKind`: 運用分類（Transient / Permanent / Infrastructure）

use thiserror::Error;

use super::ids::JobId;

/// ErrorKind は実行エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 一時的なエラー（リトライ推奨）
    Transient,
    /// 恒久的なエラー（リトライ無意味）
    Permanent,
    /// インフラエラー（backing store の障害）
    Infrastructure,
}

/// Errors from the queue store and the result store.
///
/// An empty queue is not an error: `lease` returns `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    DuplicateId(JobId),

    /// The caller's worker token does not hold the job's current lease.
    /// The worker is stale and must lease again.
    #[error("lease mismatch for job {0}")]
    LeaseMismatch(JobId),

    #[error("job {0} not found")]
    NotFound(JobId),

    /// The job exists but is not in a state the operation applies to.
    #[error("job {job_id} is {state}, cannot {operation}")]
    InvalidState {
        job_id: JobId,
        state: &'static str,
        operation: &'static str,
    },

    #[error("backing store unavailable: {0}")]
    StoreUnavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::StoreUnavailable(_) => ErrorKind::Infrastructure,
            StoreError::LeaseMismatch(_) => ErrorKind::Transient,
            StoreError::DuplicateId(_)
            | StoreError::NotFound(_)
            | StoreError::InvalidState { .. } => ErrorKind::Permanent,
        }
    }

    /// Can the caller expect the same call to succeed later?
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Worth another attempt; the dispatcher applies the retry policy.
    #[error("{0}")]
    Retryable(String),

    /// Retrying cannot help (bad input, unknown task type, ...).
    #[error("{0}")]
    Permanent(String),

    /// The handler observed the cancellation flag and stopped.
    #[error("cancelled")]
    Cancelled,
}

impl HandlerError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        HandlerError::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        HandlerError::Permanent(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Retryable(_) => ErrorKind::Transient,
            HandlerError::Permanent(_) | HandlerError::Cancelled => ErrorKind::Permanent,
        }
    }
}
