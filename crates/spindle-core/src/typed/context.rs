//! JobContext - handler に渡す実行コンテキスト
//!
//! job id, attempt 番号, キャンセルフラグを持つ。キャンセルは協調的で、
//! handler が `is_cancelled` / `cancelled` / `sleep` で確認する。

use std::time::Duration;

use tokio::sync::watch;

use crate::domain::{HandlerError, JobId, LeasedJob, TaskType};

#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    task_type: TaskType,
    attempt: u32,
    max_attempts: u32,
    cancel: watch::Receiver<bool>,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        task_type: TaskType,
        attempt: u32,
        max_attempts: u32,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_id,
            task_type,
            attempt,
            max_attempts,
            cancel,
        }
    }

    /// Context for a freshly leased job.
    pub fn for_lease(job: &LeasedJob, cancel: watch::Receiver<bool>) -> Self {
        Self::new(
            job.job_id(),
            job.envelope.task_type().clone(),
            job.attempt(),
            job.envelope.max_attempts(),
            cancel,
        )
    }

    /// A context nobody will ever cancel (tests, inline execution).
    pub fn detached(job_id: JobId, task_type: TaskType) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(job_id, task_type, 1, 1, rx)
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn check_cancelled(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        Ok(())
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// sender is gone without having cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep that gives up with `HandlerError::Cancelled` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<(), HandlerError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(HandlerError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (watch::Sender<bool>, JobContext) {
        let (tx, rx) = watch::channel(false);
        let ctx = JobContext::new(JobId::generate(), TaskType::new("t"), 2, 3, rx);
        (tx, ctx)
    }

    #[tokio::test]
    async fn sleep_completes_without_cancel() {
        let (_tx, ctx) = context();
        assert!(ctx.sleep(Duration::from_millis(5)).await.is_ok());
        assert!(!ctx.is_last_attempt());
    }

    #[tokio::test]
    async fn cancel_interrupts_sleep() {
        let (tx, ctx) = context();
        let sleeper = tokio::spawn(async move { ctx.sleep(Duration::from_secs(30)).await });

        tx.send(true).unwrap();
        let res = tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res, Err(HandlerError::Cancelled));
    }

    #[tokio::test]
    async fn detached_context_is_never_cancelled() {
        let ctx = JobContext::detached(JobId::generate(), TaskType::new("t"));
        assert!(ctx.check_cancelled().is_ok());
        assert!(ctx.sleep(Duration::from_millis(1)).await.is_ok());
    }
}
