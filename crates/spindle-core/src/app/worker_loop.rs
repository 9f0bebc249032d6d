//! WorkerPool - ジョブ実行ループ
//!
//! # フロー（slot ごと）
//! 1. QueueStore::lease_wait() で job と lease を取得
//! 2. TypedRegistry から DynHandler を解決
//! 3. handler を別 task で実行（panic を slot に波及させない）。
//!    その間 heartbeat が visibility_timeout / 2 ごとに renew する
//! 4. terminal なら result store に書いてから ack、retryable なら nack
//!
//! store が落ちている間の書き込みは shutdown まで backoff しながら続ける。
//! record を書けないまま諦めた job は ack しないので、lease が切れて再配送される。
//!
//! worker は retry するかどうかを決めない。retryable な失敗は nack するだけで、
//! 判断は Dispatcher が行う。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::domain::{HandlerError, JobId, JobRecord, LeasedJob, StoreError, WorkerToken};
use crate::ports::{Clock, IdGenerator, QueueStore, ResultStore};
use crate::queue::RetryPolicy;
use crate::typed::{JobContext, TypedRegistry};

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Once shutdown is requested, a failing store call gets this many more tries.
const STORE_ATTEMPTS_WHILE_STOPPING: u32 = 8;

/// Backoff between store retries (lease polling and result writes).
fn store_backoff() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(50),
        multiplier: 2.0,
        max_delay: Duration::from_secs(5),
        jitter: 0.2,
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub size: usize,
    /// Lease duration for jobs without their own.
    pub visibility_timeout: Duration,
    /// How long one `lease_wait` may block.
    pub lease_wait: Duration,
}

/// Everything a slot needs, shared by all slots.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<dyn QueueStore>,
    pub results: Arc<dyn ResultStore>,
    pub registry: Arc<TypedRegistry>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

/// Worker pool handle.
/// - `request_shutdown()` で新しい lease を取らなくなる
/// - `shutdown_and_join()` で実行中の job の完了まで待てる
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.size` slots.
    pub fn spawn(config: WorkerPoolConfig, deps: WorkerDeps) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(config.size);
        for index in 0..config.size {
            let slot = Slot {
                index,
                config: config.clone(),
                deps: deps.clone(),
                shutdown: shutdown_rx.clone(),
            };
            joins.push(tokio::spawn(slot.run()));
        }

        tracing::info!(size = config.size, "worker pool started");
        Self { shutdown_tx, joins }
    }

    pub fn size(&self) -> usize {
        self.joins.len()
    }

    /// Request shutdown for all slots.
    /// This does not cancel in-flight handlers; it just stops taking new leases.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Shutdown and wait for all slots.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker slot ended abnormally");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

/// What the slot reports back to the queue for one execution.
#[derive(Debug, PartialEq)]
enum Report {
    /// ack + succeeded record.
    Succeeded(Vec<u8>),
    /// ack + failed record. Retrying cannot help.
    Failed(String),
    /// nack(requeue = false); the dispatcher decides.
    Retry(String),
}

impl Report {
    fn from_execution(result: Result<Result<Vec<u8>, HandlerError>, JoinError>) -> Self {
        match result {
            Ok(Ok(output)) => Report::Succeeded(output),
            Ok(Err(HandlerError::Retryable(reason))) => Report::Retry(reason),
            Ok(Err(e @ (HandlerError::Permanent(_) | HandlerError::Cancelled))) => {
                Report::Failed(e.to_string())
            }
            Err(e) if e.is_panic() => {
                Report::Retry(format!("handler panicked: {}", panic_message(e.into_panic())))
            }
            Err(_) => Report::Retry("handler task was aborted".to_string()),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

struct Slot {
    index: usize,
    config: WorkerPoolConfig,
    deps: WorkerDeps,
    shutdown: watch::Receiver<bool>,
}

impl Slot {
    async fn run(self) {
        let mut shutdown_rx = self.shutdown.clone();
        let backoff = store_backoff();
        let mut failures: u32 = 0;

        loop {
            // shutdown が来ていたら抜ける
            if *shutdown_rx.borrow() {
                break;
            }

            // token は lease ごとに新しくする（古い lease の ack を確実に弾く）
            let token = self.deps.ids.generate_worker_token();
            let leased = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                leased = self.deps.queue.lease_wait(
                    token,
                    self.config.visibility_timeout,
                    self.config.lease_wait,
                ) => leased,
            };

            let job = match leased {
                Ok(Some(job)) => {
                    failures = 0;
                    job
                }
                Ok(None) => continue,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = backoff.next_delay(failures);
                    tracing::warn!(
                        slot = self.index,
                        error = %e,
                        retry_in = ?delay,
                        "lease failed; backing off"
                    );
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            self.process(job).await;
        }

        tracing::debug!(slot = self.index, "worker slot stopped");
    }

    async fn process(&self, job: LeasedJob) {
        let job_id = job.job_id();
        let token = job.token();
        let task_type = job.envelope.task_type().clone();
        tracing::info!(
            slot = self.index,
            %job_id,
            %task_type,
            attempt = job.attempt(),
            "job leased"
        );

        let Some(handler) = self.deps.registry.get(task_type.as_str()) else {
            let reason = format!("no handler registered for task type '{task_type}'");
            self.report(&job, Report::Failed(reason)).await;
            return;
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = JobContext::for_lease(&job, cancel_rx);
        let payload = job.envelope.payload().to_vec();
        // panic は JoinError として回収される
        let mut execution = tokio::spawn(async move { handler.handle_dyn(&ctx, &payload).await });

        let lease_for = self.lease_for(&job);
        let period = (lease_for / 2).max(MIN_HEARTBEAT);
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                result = &mut execution => break result,
                _ = heartbeat.tick() => {
                    self.heartbeat(job_id, token, lease_for, &cancel_tx).await;
                }
            }
        };

        self.report(&job, Report::from_execution(result)).await;
    }

    fn lease_for(&self, job: &LeasedJob) -> Duration {
        job.envelope
            .visibility_timeout()
            .unwrap_or(self.config.visibility_timeout)
    }

    async fn heartbeat(
        &self,
        job_id: JobId,
        token: WorkerToken,
        extension: Duration,
        cancel_tx: &watch::Sender<bool>,
    ) {
        match self.deps.queue.renew(job_id, token, extension).await {
            Ok(renewal) => {
                if renewal.cancel_requested && !*cancel_tx.borrow() {
                    tracing::info!(%job_id, "cancellation requested");
                    cancel_tx.send_replace(true);
                }
            }
            Err(StoreError::LeaseMismatch(_)) => {
                // 他の worker が持っている。handler には止まってもらう
                tracing::warn!(%job_id, "lease lost while running");
                cancel_tx.send_replace(true);
            }
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "lease renewal failed");
            }
        }
    }

    async fn report(&self, job: &LeasedJob, report: Report) {
        let job_id = job.job_id();
        let token = job.token();

        match report {
            Report::Retry(reason) => {
                tracing::warn!(%job_id, attempt = job.attempt(), %reason, "job attempt failed");
                let queue = &self.deps.queue;
                let nacked = self
                    .with_store_retry("nack", job_id, || queue.nack(job_id, token, false, &reason))
                    .await;
                if let Err(e) = nacked {
                    // lease が切れれば Dispatcher が回収する
                    tracing::warn!(%job_id, error = %e, "nack not recorded");
                }
            }
            Report::Succeeded(output) => {
                let at = self.deps.clock.now();
                let record = JobRecord::succeeded(job_id, output, job.envelope.attempt_count(), at);
                if self.finish(job, record).await {
                    tracing::info!(%job_id, "job succeeded");
                }
            }
            Report::Failed(reason) => {
                tracing::warn!(%job_id, %reason, "job failed");
                let at = self.deps.clock.now();
                let record = JobRecord::failed(job_id, reason, job.envelope.attempt_count(), at);
                self.finish(job, record).await;
            }
        }
    }

    /// Write the terminal record, then ack. Returns whether the record landed.
    ///
    /// The lease is confirmed first so a worker that lost its lease never
    /// finalizes a job someone else now owns. Until the record is written the
    /// job stays leased, so giving up means redelivery, not loss.
    async fn finish(&self, job: &LeasedJob, record: JobRecord) -> bool {
        let job_id = job.job_id();
        let token = job.token();
        let lease_for = self.lease_for(job);
        let queue = &self.deps.queue;

        match self
            .with_store_retry("confirm lease", job_id, || queue.renew(job_id, token, lease_for))
            .await
        {
            Ok(_) => {}
            Err(StoreError::LeaseMismatch(_)) => {
                tracing::warn!(%job_id, "lease lost before completion; result discarded");
                return false;
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "lease not confirmed; job will be redelivered");
                return false;
            }
        }

        let results = &self.deps.results;
        if let Err(e) = self
            .with_store_retry("put result", job_id, || results.put(record.clone()))
            .await
        {
            tracing::error!(%job_id, error = %e, "terminal record not written; job will be redelivered");
            return false;
        }

        match self
            .with_store_retry("ack", job_id, || queue.ack(job_id, token))
            .await
        {
            Ok(()) => {}
            Err(StoreError::LeaseMismatch(_)) => {
                tracing::warn!(%job_id, "lease lost after the record was written");
            }
            Err(e) => {
                // record は残っている。再実行されても最初の record が勝つ
                tracing::warn!(%job_id, error = %e, "ack failed after the record was written");
            }
        }
        true
    }

    /// Retry `op` while the store reports itself unavailable: until it
    /// recovers, or for a bounded number of tries once shutdown is requested.
    async fn with_store_retry<T, F, Fut>(
        &self,
        what: &'static str,
        job_id: JobId,
        mut op: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let backoff = store_backoff();
        let mut shutdown = self.shutdown.clone();
        let mut attempt: u32 = 1;
        let mut tries_while_stopping: u32 = 0;
        loop {
            let e = match op().await {
                Err(e) if e.is_retriable() => e,
                other => return other,
            };

            let stopping = *shutdown.borrow_and_update();
            if stopping {
                tries_while_stopping += 1;
                if tries_while_stopping >= STORE_ATTEMPTS_WHILE_STOPPING {
                    return Err(e);
                }
            }

            let delay = backoff.next_delay(attempt);
            tracing::warn!(%job_id, op = what, error = %e, retry_in = ?delay, "store unavailable");
            if stopping {
                tokio::time::sleep(delay).await;
            } else {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            attempt = attempt.saturating_add(1);
        }
    }
}
