//! GcLoop - retention window を過ぎた record と queue entry の削除

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::StoreError;
use crate::ports::clock::sub_duration;
use crate::ports::{Clock, QueueStore, ResultStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub expired_records: usize,
    pub purged_entries: usize,
}

/// GcLoop は retention を過ぎたものを削除
///
/// # フロー
/// 1. ResultStore::expire(now - retention)
/// 2. QueueStore::purge(now - retention)
pub struct GcLoop {
    queue: Arc<dyn QueueStore>,
    results: Arc<dyn ResultStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    interval: Duration,
}

impl GcLoop {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        results: Arc<dyn ResultStore>,
        clock: Arc<dyn Clock>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            results,
            clock,
            retention,
            interval,
        }
    }

    pub async fn sweep_once(&self) -> Result<GcReport, StoreError> {
        let cutoff = sub_duration(self.clock.now(), self.retention);
        let expired_records = self.results.expire(cutoff).await?;
        let purged_entries = self.queue.purge(cutoff).await?;
        Ok(GcReport {
            expired_records,
            purged_entries,
        })
    }

    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 最初の tick は即時なので飛ばす
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => match self.sweep_once().await {
                        Ok(report) => {
                            if report != GcReport::default() {
                                tracing::info!(
                                    expired_records = report.expired_records,
                                    purged_entries = report.purged_entries,
                                    "retention sweep"
                                );
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
                    },
                }
            }
            tracing::debug!("gc loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobEnvelope, JobId, JobRecord, JobState, TaskType, WorkerToken};
    use crate::impls::InMemoryResultStore;
    use crate::ports::ManualClock;
    use crate::queue::InMemoryQueueStore;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let queue = Arc::new(InMemoryQueueStore::with_clock(clock.clone()));
        let results = Arc::new(InMemoryResultStore::new());
        let gc = GcLoop::new(
            queue.clone(),
            results.clone(),
            clock.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(60),
        );

        let env = JobEnvelope::new(JobId::generate(), TaskType::new("t"), vec![], clock.now());
        let id = queue.enqueue(env).await.unwrap();
        let job = queue
            .lease(WorkerToken::generate(), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        queue.ack(id, job.token()).await.unwrap();
        results
            .put(JobRecord::succeeded(id, vec![], 0, clock.now()))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(1800));
        assert_eq!(gc.sweep_once().await.unwrap(), GcReport::default());

        // one second past the retention window
        clock.set(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 1).unwrap());
        let report = gc.sweep_once().await.unwrap();
        assert_eq!(
            report,
            GcReport {
                expired_records: 1,
                purged_entries: 1
            }
        );
        assert_eq!(results.get(id).await.unwrap().state, JobState::Unknown);
    }
}
