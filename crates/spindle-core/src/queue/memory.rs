//! In-memory queue store.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use super::{QueueEntry, QueueJobState, QueueStats};
use crate::domain::{
    DeadLetter, JobEnvelope, JobId, Lease, LeaseRenewal, LeasedJob, Priority, RetryCandidate,
    StoreError, WorkerToken,
};
use crate::ports::clock::add_duration;
use crate::ports::{CancelOutcome, Clock, QueueStore, SystemClock};

const EXPIRED_REASON: &str = "visibility timeout expired";

/// Ready-set ordering: higher priority first, then oldest, then enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Reverse<Priority>,
    created_at: DateTime<Utc>,
    seq: u64,
    job_id: JobId,
}

impl ReadyKey {
    fn of(entry: &QueueEntry) -> Self {
        Self {
            priority: Reverse(entry.envelope.priority()),
            created_at: entry.envelope.created_at(),
            seq: entry.seq,
            job_id: entry.job_id(),
        }
    }
}

/// Time-keyed index entry (retry delay or lease expiry).
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
/// Entries are never removed eagerly; stale ones are skipped on pop.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Timed {
    at: DateTime<Utc>,
    job_id: JobId,
}

impl PartialOrd for Timed {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timed {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.job_id.cmp(&self.job_id))
    }
}

struct QueueInner {
    /// All entries (single source of truth).
    entries: HashMap<JobId, QueueEntry>,

    /// Pending entries in lease order.
    ready: BTreeSet<ReadyKey>,

    /// Retry backoff.
    scheduled: BinaryHeap<Timed>,

    /// Lease expiries.
    expiry: BinaryHeap<Timed>,

    next_seq: u64,
    closed: bool,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            ready: BTreeSet::new(),
            scheduled: BinaryHeap::new(),
            expiry: BinaryHeap::new(),
            next_seq: 1,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::StoreUnavailable("queue store is closed".into()));
        }
        Ok(())
    }

    fn entry_mut(&mut self, job_id: JobId) -> Result<&mut QueueEntry, StoreError> {
        self.entries
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))
    }

    fn make_ready(&mut self, job_id: JobId, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(&job_id) {
            entry.requeue(now);
            self.ready.insert(ReadyKey::of(entry));
        }
    }

    /// Move scheduled entries whose delay has passed to the ready set.
    fn promote_scheduled(&mut self, now: DateTime<Utc>) -> bool {
        let mut promoted = false;
        while let Some(top) = self.scheduled.peek() {
            if top.at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(Timed { at, job_id }) = self.scheduled.pop() else {
                break;
            };
            let due = self.entries.get(&job_id).is_some_and(
                |e| matches!(e.state, QueueJobState::Scheduled { not_before } if not_before == at),
            );
            if due {
                self.make_ready(job_id, now);
                promoted = true;
            }
        }
        promoted
    }

    /// Reclaim leases expired at `now`.
    ///
    /// Each reclaimed job has its attempt counted. With `park`, every job
    /// waits for the dispatcher; otherwise jobs with attempts left go
    /// straight back to the ready set.
    fn reclaim_expired(&mut self, now: DateTime<Utc>, park: bool) -> Vec<JobId> {
        let mut reclaimed = Vec::new();
        while let Some(top) = self.expiry.peek() {
            if top.at > now {
                break;
            }
            let Some(Timed { at, job_id }) = self.expiry.pop() else {
                break;
            };
            let Some(entry) = self.entries.get_mut(&job_id) else {
                continue;
            };
            // Stale index entry: renewed, acked or released since.
            let current = entry.lease.as_ref().is_some_and(|l| l.expires_at == at);
            if !current || !entry.lease_expired_at(now) {
                continue;
            }

            entry.record_failure(EXPIRED_REASON, now);
            if park || entry.envelope.is_exhausted() {
                entry.park(now);
            } else {
                entry.requeue(now);
                self.ready.insert(ReadyKey::of(entry));
            }
            reclaimed.push(job_id);
        }
        reclaimed
    }

    /// Earliest instant at which something may become eligible.
    fn next_wake(&self) -> Option<DateTime<Utc>> {
        let scheduled = self.scheduled.peek().map(|t| t.at);
        let expiry = self.expiry.peek().map(|t| t.at);
        match (scheduled, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for entry in self.entries.values() {
            stats.record(entry.state);
        }
        stats
    }
}

/// In-memory queue store.
///
/// One mutex guards every index, so each operation is atomic with respect to
/// concurrent `lease` calls.
pub struct InMemoryQueueStore {
    inner: Mutex<QueueInner>,
    notify: Notify,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::new()),
            notify: Notify::new(),
            clock,
        }
    }

    /// Failure reason recorded for a job, if any.
    pub async fn last_error(&self, job_id: JobId) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.entries.get(&job_id).and_then(|e| e.last_error.clone())
    }

    /// Snapshot of a job's envelope (attempt count included).
    pub async fn envelope(&self, job_id: JobId) -> Option<JobEnvelope> {
        let inner = self.inner.lock().await;
        inner.entries.get(&job_id).map(|e| e.envelope.clone())
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, envelope: JobEnvelope) -> Result<JobId, StoreError> {
        let job_id = envelope.id();
        {
            let mut inner = self.inner.lock().await;
            inner.ensure_open()?;
            if inner.entries.contains_key(&job_id) {
                return Err(StoreError::DuplicateId(job_id));
            }

            let seq = inner.next_seq;
            inner.next_seq += 1;
            let entry = QueueEntry::new(envelope, seq, self.clock.now());
            inner.ready.insert(ReadyKey::of(&entry));
            inner.entries.insert(job_id, entry);
        }

        // Notify waiting workers
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn lease(
        &self,
        worker_token: WorkerToken,
        visibility_timeout: Duration,
    ) -> Result<Option<LeasedJob>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        let now = self.clock.now();
        inner.reclaim_expired(now, false);
        inner.promote_scheduled(now);

        while let Some(key) = inner.ready.pop_first() {
            let Some(entry) = inner.entries.get_mut(&key.job_id) else {
                continue;
            };
            if entry.state != QueueJobState::Pending {
                continue;
            }

            let timeout = entry
                .envelope
                .visibility_timeout()
                .unwrap_or(visibility_timeout);
            let lease = Lease {
                job_id: key.job_id,
                worker_token,
                acquired_at: now,
                expires_at: add_duration(now, timeout),
            };
            entry.start_lease(lease.clone());
            let leased = LeasedJob {
                envelope: entry.envelope.clone(),
                lease,
            };
            inner.expiry.push(Timed {
                at: leased.lease.expires_at,
                job_id: key.job_id,
            });
            return Ok(Some(leased));
        }
        Ok(None)
    }

    async fn wait_for_work(&self, timeout: Duration) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let wait = {
            let inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            let now = self.clock.now();
            match inner.next_wake() {
                Some(at) if at <= now => return,
                Some(at) => (at - now).to_std().unwrap_or_default().min(timeout),
                None => timeout,
            }
        };

        tokio::select! {
            _ = &mut notified => {},
            _ = tokio::time::sleep(wait) => {},
        }
    }

    async fn ack(&self, job_id: JobId, worker_token: WorkerToken) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        let now = self.clock.now();
        let entry = inner.entry_mut(job_id)?;

        if entry.is_leased_by(worker_token) {
            entry.mark_completed(worker_token, now);
            return Ok(());
        }
        if entry.state == QueueJobState::Completed && entry.acked_by == Some(worker_token) {
            return Ok(());
        }
        Err(StoreError::LeaseMismatch(job_id))
    }

    async fn nack(
        &self,
        job_id: JobId,
        worker_token: WorkerToken,
        requeue: bool,
        reason: &str,
    ) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock().await;
            inner.ensure_open()?;
            let now = self.clock.now();
            let entry = inner.entry_mut(job_id)?;
            if !entry.is_leased_by(worker_token) {
                return Err(StoreError::LeaseMismatch(job_id));
            }

            if requeue {
                inner.make_ready(job_id, now);
            } else {
                entry.record_failure(reason, now);
                entry.park(now);
                return Ok(());
            }
        }

        self.notify.notify_one();
        Ok(())
    }

    async fn renew(
        &self,
        job_id: JobId,
        worker_token: WorkerToken,
        extension: Duration,
    ) -> Result<LeaseRenewal, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        let now = self.clock.now();
        let entry = inner.entry_mut(job_id)?;

        // An expired lease is gone even if nobody reclaimed it yet.
        if !entry.is_leased_by(worker_token) || entry.lease_expired_at(now) {
            return Err(StoreError::LeaseMismatch(job_id));
        }

        let expires_at = add_duration(now, extension);
        entry.extend_lease(expires_at, now);
        let cancel_requested = entry.cancel_requested;
        inner.expiry.push(Timed {
            at: expires_at,
            job_id,
        });
        Ok(LeaseRenewal {
            expires_at,
            cancel_requested,
        })
    }

    async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        let now = self.clock.now();
        let entry = inner.entry_mut(job_id)?;

        let state = entry.state;
        if !state.is_cancellable() {
            if matches!(state, QueueJobState::Running { .. }) {
                entry.cancel_requested = true;
            }
            return Ok(CancelOutcome::NotCancellable(state));
        }

        let key = ReadyKey::of(entry);
        let attempts = entry.envelope.attempt_count();
        entry.mark_cancelled(now);
        inner.ready.remove(&key);
        Ok(CancelOutcome::Cancelled { attempts })
    }

    async fn state(&self, job_id: JobId) -> Result<Option<QueueJobState>, StoreError> {
        let inner = self.inner.lock().await;
        inner.ensure_open()?;
        Ok(inner.entries.get(&job_id).map(|e| e.state))
    }

    async fn reap_expired(&self) -> Result<Vec<JobId>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        let now = self.clock.now();
        Ok(inner.reclaim_expired(now, true))
    }

    async fn awaiting_decision(&self) -> Result<Vec<RetryCandidate>, StoreError> {
        let inner = self.inner.lock().await;
        inner.ensure_open()?;
        let mut candidates: Vec<RetryCandidate> = inner
            .entries
            .values()
            .filter(|e| e.state == QueueJobState::AwaitingDecision)
            .map(|e| RetryCandidate {
                job_id: e.job_id(),
                attempt_count: e.envelope.attempt_count(),
                max_attempts: e.envelope.max_attempts(),
                last_error: e.last_error.clone().unwrap_or_default(),
            })
            .collect();
        candidates.sort_by_key(|c| c.job_id);
        Ok(candidates)
    }

    async fn schedule_retry(
        &self,
        job_id: JobId,
        not_before: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock().await;
            inner.ensure_open()?;
            let now = self.clock.now();
            let entry = inner.entry_mut(job_id)?;
            if entry.state != QueueJobState::AwaitingDecision {
                return Err(StoreError::InvalidState {
                    job_id,
                    state: entry.state.name(),
                    operation: "schedule_retry",
                });
            }

            if not_before <= now {
                inner.make_ready(job_id, now);
            } else {
                entry.schedule(not_before, now);
                inner.scheduled.push(Timed {
                    at: not_before,
                    job_id,
                });
            }
        }

        // Waiters recompute their wake-up time.
        self.notify.notify_one();
        Ok(())
    }

    async fn bury(&self, job_id: JobId, reason: &str) -> Result<DeadLetter, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        let now = self.clock.now();
        let entry = inner.entry_mut(job_id)?;
        if entry.state != QueueJobState::AwaitingDecision {
            return Err(StoreError::InvalidState {
                job_id,
                state: entry.state.name(),
                operation: "bury",
            });
        }

        entry.mark_dead(reason, now);
        Ok(DeadLetter {
            envelope: entry.envelope.clone(),
            reason: reason.to_string(),
            dead_at: now,
        })
    }

    async fn purge(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, e| !(e.state.is_terminal() && e.updated_at < older_than));
        Ok(before - inner.entries.len())
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let inner = self.inner.lock().await;
        inner.ensure_open()?;
        Ok(inner.stats())
    }

    async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::domain::TaskType;
    use crate::ports::ManualClock;
    use chrono::TimeZone;

    const VT: Duration = Duration::from_secs(30);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn manual_store() -> (Arc<ManualClock>, InMemoryQueueStore) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = InMemoryQueueStore::with_clock(clock.clone());
        (clock, store)
    }

    fn envelope(created_at: DateTime<Utc>) -> JobEnvelope {
        JobEnvelope::new(
            JobId::generate(),
            TaskType::new("demo.echo"),
            b"{}".to_vec(),
            created_at,
        )
        .with_max_attempts(3)
    }

    async fn lease_one(store: &InMemoryQueueStore) -> LeasedJob {
        store
            .lease(WorkerToken::generate(), VT)
            .await
            .unwrap()
            .expect("a job should be eligible")
    }

    #[tokio::test]
    async fn enqueue_and_stats() {
        let store = InMemoryQueueStore::new();
        store.enqueue(envelope(Utc::now())).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = InMemoryQueueStore::new();
        let env = envelope(Utc::now());
        store.enqueue(env.clone()).await.unwrap();

        let err = store.enqueue(env.clone()).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateId(env.id()));
    }

    #[tokio::test]
    async fn empty_queue_leases_nothing() {
        let store = InMemoryQueueStore::new();
        let leased = store.lease(WorkerToken::generate(), VT).await.unwrap();
        assert!(leased.is_none());
    }

    #[tokio::test]
    async fn same_priority_is_fifo() {
        let (_, store) = manual_store();
        let a = envelope(t0()).with_priority(Priority(1));
        let b = envelope(t0()).with_priority(Priority(1));
        store.enqueue(a.clone()).await.unwrap();
        store.enqueue(b.clone()).await.unwrap();

        assert_eq!(lease_one(&store).await.job_id(), a.id());
        assert_eq!(lease_one(&store).await.job_id(), b.id());
    }

    #[tokio::test]
    async fn older_created_at_wins_over_enqueue_order() {
        let (_, store) = manual_store();
        let newer = envelope(t0() + chrono::TimeDelta::seconds(5));
        let older = envelope(t0());
        store.enqueue(newer.clone()).await.unwrap();
        store.enqueue(older.clone()).await.unwrap();

        assert_eq!(lease_one(&store).await.job_id(), older.id());
    }

    #[tokio::test]
    async fn higher_priority_first() {
        let (_, store) = manual_store();
        let low = envelope(t0()).with_priority(Priority::LOW);
        let high = envelope(t0() + chrono::TimeDelta::seconds(1)).with_priority(Priority::HIGH);
        store.enqueue(low.clone()).await.unwrap();
        store.enqueue(high.clone()).await.unwrap();

        assert_eq!(lease_one(&store).await.job_id(), high.id());
        assert_eq!(lease_one(&store).await.job_id(), low.id());
    }

    #[tokio::test]
    async fn lease_transitions_to_running() {
        let (_, store) = manual_store();
        let env = envelope(t0());
        store.enqueue(env.clone()).await.unwrap();

        let leased = lease_one(&store).await;
        assert_eq!(leased.attempt(), 1);
        assert_eq!(leased.lease.expires_at, t0() + chrono::TimeDelta::seconds(30));

        let state = store.state(env.id()).await.unwrap();
        assert!(matches!(state, Some(QueueJobState::Running { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_leases_are_exclusive() {
        let store = Arc::new(InMemoryQueueStore::new());
        for _ in 0..50 {
            store.enqueue(envelope(Utc::now())).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(job) = store.lease(WorkerToken::generate(), VT).await.unwrap() {
                    got.push(job.job_id());
                }
                got
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job {id} leased twice");
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn ack_completes_and_is_idempotent() {
        let store = InMemoryQueueStore::new();
        store.enqueue(envelope(Utc::now())).await.unwrap();
        let leased = lease_one(&store).await;

        store.ack(leased.job_id(), leased.token()).await.unwrap();
        store.ack(leased.job_id(), leased.token()).await.unwrap();

        assert_eq!(
            store.state(leased.job_id()).await.unwrap(),
            Some(QueueJobState::Completed)
        );
        assert!(store.lease(WorkerToken::generate(), VT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_token_is_rejected() {
        let store = InMemoryQueueStore::new();
        store.enqueue(envelope(Utc::now())).await.unwrap();
        let leased = lease_one(&store).await;
        let stranger = WorkerToken::generate();

        let err = store.ack(leased.job_id(), stranger).await.unwrap_err();
        assert_eq!(err, StoreError::LeaseMismatch(leased.job_id()));
        let err = store.renew(leased.job_id(), stranger, VT).await.unwrap_err();
        assert_eq!(err, StoreError::LeaseMismatch(leased.job_id()));
        let err = store
            .nack(leased.job_id(), stranger, true, "x")
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::LeaseMismatch(leased.job_id()));
    }

    #[tokio::test]
    async fn ack_unknown_job_is_not_found() {
        let store = InMemoryQueueStore::new();
        let id = JobId::generate();
        let err = store.ack(id, WorkerToken::generate()).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound(id));
    }

    #[tokio::test]
    async fn lease_expires_exactly_at_visibility_timeout() {
        let (clock, store) = manual_store();
        let env = envelope(t0());
        store.enqueue(env.clone()).await.unwrap();
        let first = lease_one(&store).await;

        clock.advance(VT - Duration::from_millis(1));
        assert!(store.lease(WorkerToken::generate(), VT).await.unwrap().is_none());

        clock.advance(Duration::from_millis(1));
        let second = lease_one(&store).await;
        assert_eq!(second.job_id(), env.id());
        assert_eq!(second.envelope.attempt_count(), 1);
        assert_ne!(second.token(), first.token());

        // the first worker is stale now
        let err = store.ack(first.job_id(), first.token()).await.unwrap_err();
        assert_eq!(err, StoreError::LeaseMismatch(env.id()));
    }

    #[tokio::test]
    async fn per_job_visibility_timeout_overrides_default() {
        let (clock, store) = manual_store();
        let env = envelope(t0()).with_visibility_timeout(Duration::from_secs(2));
        store.enqueue(env).await.unwrap();
        lease_one(&store).await;

        clock.advance(Duration::from_secs(2));
        assert!(store.lease(WorkerToken::generate(), VT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn renew_extends_the_lease() {
        let (clock, store) = manual_store();
        store.enqueue(envelope(t0())).await.unwrap();
        let leased = lease_one(&store).await;

        clock.advance(Duration::from_secs(20));
        let renewal = store
            .renew(leased.job_id(), leased.token(), VT)
            .await
            .unwrap();
        assert_eq!(renewal.expires_at, t0() + chrono::TimeDelta::seconds(50));
        assert!(!renewal.cancel_requested);

        clock.advance(Duration::from_secs(20));
        assert!(store.lease(WorkerToken::generate(), VT).await.unwrap().is_none());
        assert!(store.reap_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn renew_after_expiry_fails() {
        let (clock, store) = manual_store();
        store.enqueue(envelope(t0())).await.unwrap();
        let leased = lease_one(&store).await;

        clock.advance(VT);
        let err = store
            .renew(leased.job_id(), leased.token(), VT)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::LeaseMismatch(leased.job_id()));
    }

    #[tokio::test]
    async fn nack_requeue_does_not_count_attempt() {
        let store = InMemoryQueueStore::new();
        store.enqueue(envelope(Utc::now())).await.unwrap();
        let leased = lease_one(&store).await;

        store
            .nack(leased.job_id(), leased.token(), true, "shutting down")
            .await
            .unwrap();

        let again = lease_one(&store).await;
        assert_eq!(again.job_id(), leased.job_id());
        assert_eq!(again.envelope.attempt_count(), 0);
    }

    #[tokio::test]
    async fn nack_without_requeue_parks_for_decision() {
        let store = InMemoryQueueStore::new();
        store.enqueue(envelope(Utc::now())).await.unwrap();
        let leased = lease_one(&store).await;

        store
            .nack(leased.job_id(), leased.token(), false, "boom")
            .await
            .unwrap();

        assert!(store.lease(WorkerToken::generate(), VT).await.unwrap().is_none());
        let candidates = store.awaiting_decision().await.unwrap();
        assert_eq!(
            candidates,
            vec![RetryCandidate {
                job_id: leased.job_id(),
                attempt_count: 1,
                max_attempts: 3,
                last_error: "boom".into(),
            }]
        );
    }

    #[tokio::test]
    async fn reap_counts_expired_attempt_once() {
        let (clock, store) = manual_store();
        store.enqueue(envelope(t0())).await.unwrap();
        let leased = lease_one(&store).await;

        clock.advance(VT);
        let reaped = store.reap_expired().await.unwrap();
        assert_eq!(reaped, vec![leased.job_id()]);
        assert!(store.reap_expired().await.unwrap().is_empty());

        let candidates = store.awaiting_decision().await.unwrap();
        assert_eq!(candidates[0].attempt_count, 1);
        assert_eq!(candidates[0].last_error, EXPIRED_REASON);
    }

    #[tokio::test]
    async fn schedule_retry_waits_for_not_before() {
        let (clock, store) = manual_store();
        store.enqueue(envelope(t0())).await.unwrap();
        let leased = lease_one(&store).await;
        store
            .nack(leased.job_id(), leased.token(), false, "boom")
            .await
            .unwrap();

        let not_before = t0() + chrono::TimeDelta::seconds(10);
        store
            .schedule_retry(leased.job_id(), not_before)
            .await
            .unwrap();
        assert_eq!(
            store.state(leased.job_id()).await.unwrap(),
            Some(QueueJobState::Scheduled { not_before })
        );
        assert!(store.lease(WorkerToken::generate(), VT).await.unwrap().is_none());

        clock.advance(Duration::from_secs(10));
        let again = lease_one(&store).await;
        assert_eq!(again.job_id(), leased.job_id());
        assert_eq!(again.attempt(), 2);
    }

    #[tokio::test]
    async fn schedule_retry_requires_parked_job() {
        let store = InMemoryQueueStore::new();
        let env = envelope(Utc::now());
        store.enqueue(env.clone()).await.unwrap();

        let err = store
            .schedule_retry(env.id(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { operation: "schedule_retry", .. }));
    }

    #[tokio::test]
    async fn bury_makes_job_dead() {
        let store = InMemoryQueueStore::new();
        store.enqueue(envelope(Utc::now())).await.unwrap();
        let leased = lease_one(&store).await;
        store
            .nack(leased.job_id(), leased.token(), false, "boom")
            .await
            .unwrap();

        let letter = store.bury(leased.job_id(), "boom").await.unwrap();
        assert_eq!(letter.job_id(), leased.job_id());
        assert_eq!(letter.attempts(), 1);
        assert_eq!(
            store.state(leased.job_id()).await.unwrap(),
            Some(QueueJobState::Dead)
        );
        assert!(store.lease(WorkerToken::generate(), VT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inline_reclaim_parks_exhausted_job() {
        let (clock, store) = manual_store();
        let env = envelope(t0()).with_max_attempts(1);
        store.enqueue(env.clone()).await.unwrap();
        lease_one(&store).await;

        clock.advance(VT);
        assert!(store.lease(WorkerToken::generate(), VT).await.unwrap().is_none());
        assert_eq!(
            store.state(env.id()).await.unwrap(),
            Some(QueueJobState::AwaitingDecision)
        );
    }

    #[tokio::test]
    async fn cancel_pending_removes_it() {
        let store = InMemoryQueueStore::new();
        let env = envelope(Utc::now());
        store.enqueue(env.clone()).await.unwrap();

        let outcome = store.cancel(env.id()).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled { attempts: 0 });
        assert!(store.lease(WorkerToken::generate(), VT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_running_sets_flag_seen_on_renew() {
        let store = InMemoryQueueStore::new();
        store.enqueue(envelope(Utc::now())).await.unwrap();
        let leased = lease_one(&store).await;

        let outcome = store.cancel(leased.job_id()).await.unwrap();
        assert!(matches!(
            outcome,
            CancelOutcome::NotCancellable(QueueJobState::Running { .. })
        ));

        let renewal = store
            .renew(leased.job_id(), leased.token(), VT)
            .await
            .unwrap();
        assert!(renewal.cancel_requested);
    }

    #[tokio::test]
    async fn purge_drops_only_old_terminal_entries() {
        let (clock, store) = manual_store();
        store.enqueue(envelope(t0())).await.unwrap();
        store.enqueue(envelope(t0())).await.unwrap();
        let leased = lease_one(&store).await;
        store.ack(leased.job_id(), leased.token()).await.unwrap();

        clock.advance(Duration::from_secs(60));
        let purged = store.purge(clock.now()).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.state(leased.job_id()).await.unwrap(), None);
        assert_eq!(store.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn closed_store_is_unavailable() {
        let store = InMemoryQueueStore::new();
        store.close().await;

        let err = store.enqueue(envelope(Utc::now())).await.unwrap_err();
        assert!(matches!(err, StoreError::StoreUnavailable(_)));
        assert!(err.is_retriable());
        let err = store
            .lease(WorkerToken::generate(), VT)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn lease_wait_picks_up_late_enqueue() {
        let store = Arc::new(InMemoryQueueStore::new());
        let producer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                store.enqueue(envelope(Utc::now())).await.unwrap();
            })
        };

        let leased = store
            .lease_wait(WorkerToken::generate(), VT, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(leased.is_some());
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn lease_wait_times_out_on_empty_queue() {
        let store = InMemoryQueueStore::new();
        let leased = store
            .lease_wait(WorkerToken::generate(), VT, Duration::from_millis(30))
            .await
            .unwrap();
        assert!(leased.is_none());
    }
}
