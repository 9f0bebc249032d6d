//! Dispatcher - lease 期限切れの回収と retry / dead の判断
//!
//! # フロー（tick ごと）
//! 1. QueueStore::reap_expired() で期限切れ lease を回収（attempt_count + 1）
//! 2. QueueStore::awaiting_decision() で判断待ちの job を取得
//! 3. Decider で Retry / MarkDead を決める
//! 4. Retry → schedule_retry(now + delay)
//!    MarkDead → dead record → bury → DeadLetterSink
//!
//! dead record は bury の前に書く。書けなければ job は判断待ちのまま残り、
//! 次の tick でやり直される。
//!
//! retry policy を決めるのはここだけ。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{Decider, Decision, JobRecord, RetryCandidate, StoreError};
use crate::ports::clock::add_duration;
use crate::ports::{Clock, DeadLetterSink, QueueStore, ResultStore};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Expired leases reclaimed.
    pub reaped: usize,
    /// Jobs scheduled for another attempt.
    pub retried: usize,
    /// Jobs moved to the dead letter sink.
    pub buried: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.reaped == 0 && self.retried == 0 && self.buried == 0
    }
}

pub struct Dispatcher {
    queue: Arc<dyn QueueStore>,
    results: Arc<dyn ResultStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn QueueStore>,
        results: Arc<dyn ResultStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        decider: Arc<dyn Decider>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            results,
            dead_letters,
            decider,
            clock,
            interval,
        }
    }

    /// One reconciliation pass.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport::default();

        let reaped = self.queue.reap_expired().await?;
        for job_id in &reaped {
            tracing::warn!(%job_id, "lease expired; reclaimed");
        }
        report.reaped = reaped.len();

        for candidate in self.queue.awaiting_decision().await? {
            match self.decider.decide(&candidate) {
                Decision::Retry { delay, reason } => {
                    if self.retry(&candidate, delay, &reason).await? {
                        report.retried += 1;
                    }
                }
                Decision::MarkDead { reason } => {
                    if self.bury(&candidate, &reason).await? {
                        report.buried += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// `Ok(false)` when the job moved on concurrently (e.g. was cancelled).
    async fn retry(
        &self,
        candidate: &RetryCandidate,
        delay: Duration,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let job_id = candidate.job_id;
        let not_before = add_duration(self.clock.now(), delay);
        match self.queue.schedule_retry(job_id, not_before).await {
            Ok(()) => {
                tracing::info!(%job_id, retry_in = ?delay, %reason, "retry scheduled");
                Ok(true)
            }
            Err(StoreError::InvalidState { .. } | StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn bury(&self, candidate: &RetryCandidate, reason: &str) -> Result<bool, StoreError> {
        let job_id = candidate.job_id;
        let record = JobRecord::dead(job_id, reason, candidate.attempt_count, self.clock.now());
        self.results.put(record).await?;

        let letter = match self.queue.bury(job_id, reason).await {
            Ok(letter) => letter,
            Err(StoreError::InvalidState { .. } | StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        tracing::error!(%job_id, attempts = letter.attempts(), %reason, "job is dead");

        if let Err(e) = self.dead_letters.record(letter).await {
            tracing::warn!(%job_id, error = %e, "dead letter not recorded");
        }
        Ok(true)
    }

    /// Tick every `interval` until shutdown.
    pub fn spawn(self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match self.reconcile_once().await {
                            Ok(report) if !report.is_empty() => {
                                tracing::debug!(?report, "reconciled");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "reconciliation failed"),
                        }
                    }
                }
            }
            tracing::debug!("dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DefaultDecider, JobEnvelope, JobId, JobState, TaskType, WorkerToken};
    use crate::impls::result_store::fixtures::FlakyResults;
    use crate::impls::{InMemoryDeadLetters, InMemoryResultStore};
    use crate::ports::ManualClock;
    use crate::queue::{InMemoryQueueStore, QueueJobState, RetryPolicy};
    use chrono::{TimeZone, Utc};

    const VT: Duration = Duration::from_secs(10);

    struct Fixture {
        clock: Arc<ManualClock>,
        queue: Arc<InMemoryQueueStore>,
        results: Arc<InMemoryResultStore>,
        dead_letters: Arc<InMemoryDeadLetters>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        fixture_with_failing_puts(0)
    }

    fn fixture_with_failing_puts(failing_puts: u32) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let queue = Arc::new(InMemoryQueueStore::with_clock(clock.clone()));
        let results = Arc::new(InMemoryResultStore::new());
        let dead_letters = Arc::new(InMemoryDeadLetters::new());
        let decider = DefaultDecider::new(RetryPolicy {
            base_delay: Duration::from_secs(2),
            jitter: 0.0,
            ..RetryPolicy::default()
        });
        let dispatcher = Dispatcher::new(
            queue.clone(),
            Arc::new(FlakyResults::new(results.clone(), failing_puts)),
            dead_letters.clone(),
            Arc::new(decider),
            clock.clone(),
            Duration::from_millis(10),
        );
        Fixture {
            clock,
            queue,
            results,
            dead_letters,
            dispatcher,
        }
    }

    async fn enqueue(f: &Fixture, max_attempts: u32) -> JobId {
        let env = JobEnvelope::new(JobId::generate(), TaskType::new("t"), b"{}".to_vec(), f.clock.now())
            .with_max_attempts(max_attempts);
        f.queue.enqueue(env).await.unwrap()
    }

    async fn lease_and_nack(f: &Fixture, reason: &str) {
        let job = f.queue.lease(WorkerToken::generate(), VT).await.unwrap().unwrap();
        f.queue
            .nack(job.job_id(), job.token(), false, reason)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_lease_is_retried_with_one_more_attempt() {
        let f = fixture();
        let id = enqueue(&f, 3).await;
        f.queue.lease(WorkerToken::generate(), VT).await.unwrap().unwrap();

        f.clock.advance(VT);
        let report = f.dispatcher.reconcile_once().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                reaped: 1,
                retried: 1,
                buried: 0
            }
        );

        assert_eq!(f.queue.envelope(id).await.unwrap().attempt_count(), 1);

        // backoff for the first failure is base_delay
        assert!(f.queue.lease(WorkerToken::generate(), VT).await.unwrap().is_none());
        f.clock.advance(Duration::from_secs(2));
        let again = f.queue.lease(WorkerToken::generate(), VT).await.unwrap().unwrap();
        assert_eq!(again.job_id(), id);
        assert_eq!(again.envelope.attempt_count(), 1);
    }

    #[tokio::test]
    async fn single_attempt_failure_goes_dead() {
        let f = fixture();
        let id = enqueue(&f, 1).await;
        lease_and_nack(&f, "boom").await;

        let report = f.dispatcher.reconcile_once().await.unwrap();
        assert_eq!(report.buried, 1);

        let status = f.results.get(id).await.unwrap();
        assert_eq!(status.state, JobState::Dead);
        assert!(status.error.unwrap().contains("boom"));
        assert_eq!(f.queue.state(id).await.unwrap(), Some(QueueJobState::Dead));

        let letters = f.dead_letters.list(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].job_id(), id);
    }

    #[tokio::test]
    async fn dead_after_exactly_max_attempts() {
        let f = fixture();
        let id = enqueue(&f, 3).await;

        for attempt in 1..=3 {
            lease_and_nack(&f, "boom").await;
            let report = f.dispatcher.reconcile_once().await.unwrap();
            if attempt < 3 {
                assert_eq!(report.retried, 1, "attempt {attempt}");
                f.clock.advance(Duration::from_secs(600));
            } else {
                assert_eq!(report.buried, 1);
            }
        }

        let status = f.results.get(id).await.unwrap();
        assert_eq!(status.state, JobState::Dead);
        assert!(f.queue.lease(WorkerToken::generate(), VT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dead_record_waits_for_the_result_store() {
        let f = fixture_with_failing_puts(2);
        let id = enqueue(&f, 1).await;
        lease_and_nack(&f, "boom").await;

        for _ in 0..2 {
            let err = f.dispatcher.reconcile_once().await.unwrap_err();
            assert!(err.is_retriable());
            // still waiting for a decision, nothing buried yet
            assert_eq!(
                f.queue.state(id).await.unwrap(),
                Some(QueueJobState::AwaitingDecision)
            );
            assert!(f.dead_letters.list(10).await.unwrap().is_empty());
        }

        let report = f.dispatcher.reconcile_once().await.unwrap();
        assert_eq!(report.buried, 1);
        let status = f.results.get(id).await.unwrap();
        assert_eq!(status.state, JobState::Dead);
        assert!(status.error.unwrap().contains("boom"));
        assert_eq!(f.queue.state(id).await.unwrap(), Some(QueueJobState::Dead));
        assert_eq!(f.dead_letters.list(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn idle_pass_reports_nothing() {
        let f = fixture();
        enqueue(&f, 3).await;
        assert!(f.dispatcher.reconcile_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_shutdown() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);
        let handle = f.dispatcher.spawn(rx);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
