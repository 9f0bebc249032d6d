//! InMemoryResultStore - 開発用・テスト用の result store
//!
//! # 実装詳細
//! - HashMap<JobId, JobRecord> を tokio Mutex で保護
//! - put 時に Notify で `wait_for` の待機者を起こす
//! - 最初の terminal record が勝つ（2 回目以降の put は no-op）

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::domain::{JobId, JobRecord, JobStatus, StoreError};
use crate::ports::ResultStore;

#[derive(Default)]
struct Records {
    by_id: HashMap<JobId, JobRecord>,
    closed: bool,
}

#[derive(Default)]
pub struct InMemoryResultStore {
    records: Mutex<Records>,
    notify: Notify,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.records.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn closed() -> StoreError {
    StoreError::StoreUnavailable("result store is closed".into())
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put(&self, record: JobRecord) -> Result<(), StoreError> {
        {
            let mut records = self.records.lock().await;
            if records.closed {
                return Err(closed());
            }
            if let Some(existing) = records.by_id.get(&record.job_id) {
                if existing.state != record.state {
                    tracing::warn!(
                        job_id = %record.job_id,
                        stored = %existing.state,
                        rejected = %record.state,
                        "conflicting terminal record ignored"
                    );
                }
                return Ok(());
            }
            records.by_id.insert(record.job_id, record);
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<JobStatus, StoreError> {
        let records = self.records.lock().await;
        if records.closed {
            return Err(closed());
        }
        Ok(records
            .by_id
            .get(&job_id)
            .cloned()
            .map(JobStatus::from)
            .unwrap_or_else(|| JobStatus::unknown(job_id)))
    }

    async fn expire(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        if records.closed {
            return Err(closed());
        }
        let before = records.by_id.len();
        records.by_id.retain(|_, r| r.completed_at >= older_than);
        Ok(before - records.by_id.len())
    }

    async fn wait_for(&self, job_id: JobId, timeout: Duration) -> Result<JobStatus, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let status = self.get(job_id).await?;
            if status.is_terminal() {
                return Ok(status);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(status);
            }
        }
    }

    async fn close(&self) {
        self.records.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports itself unavailable for the first `failing_puts` writes.
    pub(crate) struct FlakyResults {
        pub(crate) inner: Arc<InMemoryResultStore>,
        failing_puts: AtomicU32,
    }

    impl FlakyResults {
        pub(crate) fn new(inner: Arc<InMemoryResultStore>, failing_puts: u32) -> Self {
            Self {
                inner,
                failing_puts: AtomicU32::new(failing_puts),
            }
        }

        pub(crate) fn failures_left(&self) -> u32 {
            self.failing_puts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResultStore for FlakyResults {
        async fn put(&self, record: JobRecord) -> Result<(), StoreError> {
            let fail = self
                .failing_puts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(StoreError::StoreUnavailable("result store is down".into()));
            }
            self.inner.put(record).await
        }

        async fn get(&self, job_id: JobId) -> Result<JobStatus, StoreError> {
            self.inner.get(job_id).await
        }

        async fn expire(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
            self.inner.expire(older_than).await
        }

        async fn wait_for(&self, job_id: JobId, timeout: Duration) -> Result<JobStatus, StoreError> {
            self.inner.wait_for(job_id, timeout).await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobState;
    use chrono::TimeDelta;
    use std::sync::Arc;

    #[tokio::test]
    async fn get_unknown_job() {
        let store = InMemoryResultStore::new();
        let id = JobId::generate();
        assert_eq!(store.get(id).await.unwrap(), JobStatus::unknown(id));
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = InMemoryResultStore::new();
        let id = JobId::generate();
        let at = Utc::now();
        store
            .put(JobRecord::succeeded(id, b"42".to_vec(), 0, at))
            .await
            .unwrap();

        let status = store.get(id).await.unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(status.result.as_deref(), Some(&b"42"[..]));
        assert_eq!(status.completed_at, Some(at));
    }

    #[tokio::test]
    async fn first_terminal_record_wins() {
        let store = InMemoryResultStore::new();
        let id = JobId::generate();
        let at = Utc::now();
        store
            .put(JobRecord::succeeded(id, b"1".to_vec(), 0, at))
            .await
            .unwrap();
        store.put(JobRecord::dead(id, "late", 3, at)).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().state, JobState::Succeeded);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn expire_drops_old_records() {
        let store = InMemoryResultStore::new();
        let now = Utc::now();
        let old = JobId::generate();
        let fresh = JobId::generate();
        store
            .put(JobRecord::failed(old, "x", 1, now - TimeDelta::hours(2)))
            .await
            .unwrap();
        store
            .put(JobRecord::failed(fresh, "x", 1, now))
            .await
            .unwrap();

        let expired = store.expire(now - TimeDelta::hours(1)).await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(store.get(old).await.unwrap().state, JobState::Unknown);
        assert_eq!(store.get(fresh).await.unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn wait_for_wakes_on_put() {
        let store = Arc::new(InMemoryResultStore::new());
        let id = JobId::generate();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                store
                    .put(JobRecord::succeeded(id, vec![], 0, Utc::now()))
                    .await
                    .unwrap();
            })
        };

        let status = store.wait_for(id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_times_out_with_last_status() {
        let store = InMemoryResultStore::new();
        let id = JobId::generate();
        let status = store
            .wait_for(id, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(status.state, JobState::Unknown);
    }

    #[tokio::test]
    async fn closed_store_is_unavailable() {
        let store = InMemoryResultStore::new();
        store.close().await;
        let err = store.get(JobId::generate()).await.unwrap_err();
        assert!(matches!(err, StoreError::StoreUnavailable(_)));
    }
}
