//! Runtime - front end から使う facade
//!
//! stores を開き、worker pool / dispatcher / GC loop を起動・停止し、
//! `submit` / `status` / `cancel` を提供する。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::gc_loop::GcLoop;
use super::reaper_loop::{Dispatcher, ReconcileReport};
use super::status;
use super::worker_loop::{WorkerDeps, WorkerPool, WorkerPoolConfig};
use crate::config::{ConfigError, SpindleConfig};
use crate::domain::{
    DeadLetter, Decider, DefaultDecider, JobEnvelope, JobId, JobRecord, JobStatus, Priority,
    StoreError, TaskType,
};
use crate::impls::{InMemoryDeadLetters, InMemoryResultStore};
use crate::ports::{
    CancelOutcome, Clock, DeadLetterSink, IdGenerator, QueueStore, ResultStore, SystemClock,
    UlidGenerator,
};
use crate::queue::{InMemoryQueueStore, QueueStats};
use crate::typed::{CodecError, PayloadCodec, Task, TypedRegistry};

/// A job submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub task_type: TaskType,
    pub payload: Vec<u8>,
    pub priority: Option<Priority>,
    pub max_attempts: Option<u32>,
    pub visibility_timeout: Option<Duration>,
    /// Caller-chosen id; generated when absent.
    pub job_id: Option<JobId>,
}

impl SubmitRequest {
    pub fn new(task_type: impl Into<TaskType>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            task_type: task_type.into(),
            payload: payload.into(),
            priority: None,
            max_attempts: None,
            visibility_timeout: None,
            job_id: None,
        }
    }

    /// Request for a typed task, payload encoded as JSON.
    pub fn typed<T: Task>(task: &T) -> Result<Self, CodecError> {
        Ok(Self::new(T::TYPE, PayloadCodec::encode_task(task)?))
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("task type must not be empty")]
    EmptyTaskType,

    #[error("no handler registered for task type '{0}'")]
    UnknownTaskType(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubmitError {
    /// Worth retrying the same submission later?
    pub fn is_retriable(&self) -> bool {
        matches!(self, SubmitError::Store(e) if e.is_retriable())
    }
}

/// The stores a runtime works against.
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub results: Arc<dyn ResultStore>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
}

impl Stores {
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Arc::new(InMemoryQueueStore::with_clock(clock)),
            results: Arc::new(InMemoryResultStore::new()),
            dead_letters: Arc::new(InMemoryDeadLetters::new()),
        }
    }

    /// Open the stores named by `store_url`.
    pub fn open(store_url: &str, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        match store_url.split_once("://") {
            Some(("memory", _)) => Ok(Self::in_memory(clock)),
            _ => Err(ConfigError::UnsupportedStore(store_url.to_string())),
        }
    }
}

/// Background tasks started by `start`.
struct Background {
    shutdown_tx: watch::Sender<bool>,
    pool: WorkerPool,
    loops: Vec<JoinHandle<()>>,
}

pub struct Runtime {
    config: SpindleConfig,
    registry: Arc<TypedRegistry>,
    stores: Stores,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    background: Mutex<Option<Background>>,
}

impl Runtime {
    /// Validate `config` and open its stores.
    pub fn open(config: SpindleConfig, registry: TypedRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let stores = Stores::open(&config.store_url, clock.clone())?;
        let decider = Arc::new(DefaultDecider::new(config.retry_policy()));
        Ok(Self::from_parts(config, registry, stores, decider, clock))
    }

    /// Wire a runtime from explicit parts. `config` is taken as is.
    pub fn from_parts(
        config: SpindleConfig,
        registry: TypedRegistry,
        stores: Stores,
        decider: Arc<dyn Decider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            stores,
            decider,
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock,
            background: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SpindleConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypedRegistry {
        &self.registry
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<JobId, SubmitError> {
        if request.task_type.is_empty() {
            return Err(SubmitError::EmptyTaskType);
        }
        if !self.registry.contains(request.task_type.as_str()) {
            return Err(SubmitError::UnknownTaskType(request.task_type.to_string()));
        }

        let job_id = request
            .job_id
            .unwrap_or_else(|| self.ids.generate_job_id());
        let mut envelope =
            JobEnvelope::new(job_id, request.task_type, request.payload, self.clock.now())
                .with_priority(request.priority.unwrap_or_default())
                .with_max_attempts(request.max_attempts.unwrap_or(self.config.max_attempts));
        if let Some(timeout) = request.visibility_timeout {
            envelope = envelope.with_visibility_timeout(timeout);
        }

        let task_type = envelope.task_type().clone();
        let job_id = self.stores.queue.enqueue(envelope).await?;
        tracing::info!(%job_id, %task_type, "job submitted");
        Ok(job_id)
    }

    pub async fn submit_task<T: Task>(&self, task: &T) -> Result<JobId, SubmitError> {
        self.submit(SubmitRequest::typed(task)?).await
    }

    /// Current status. Unknown ids come back as `Unknown`, not as errors.
    pub async fn status(&self, job_id: JobId) -> Result<JobStatus, StoreError> {
        let record = self.stores.results.get(job_id).await?;
        if record.is_terminal() {
            return Ok(record);
        }
        let queue_state = self.stores.queue.state(job_id).await?;
        Ok(status::resolve(job_id, record, queue_state))
    }

    /// Wait up to `timeout` for a terminal status.
    pub async fn wait_for(&self, job_id: JobId, timeout: Duration) -> Result<JobStatus, StoreError> {
        let record = self.stores.results.wait_for(job_id, timeout).await?;
        if record.is_terminal() {
            return Ok(record);
        }
        self.status(job_id).await
    }

    /// Cancel a job that has not been leased; running jobs are only flagged.
    /// Returns the status after the request.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobStatus, StoreError> {
        match self.stores.queue.cancel(job_id).await {
            Ok(CancelOutcome::Cancelled { attempts }) => {
                let record = JobRecord::failed(job_id, "cancelled", attempts, self.clock.now());
                self.stores.results.put(record).await?;
                tracing::info!(%job_id, "job cancelled");
                self.status(job_id).await
            }
            Ok(CancelOutcome::NotCancellable(state)) => {
                tracing::info!(%job_id, state = state.name(), "job not cancellable");
                self.status(job_id).await
            }
            Err(StoreError::NotFound(_)) => self.status(job_id).await,
            Err(e) => Err(e),
        }
    }

    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        self.stores.queue.stats().await
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        self.stores.dead_letters.list(limit).await
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.stores.queue.clone(),
            self.stores.results.clone(),
            self.stores.dead_letters.clone(),
            self.decider.clone(),
            self.clock.clone(),
            self.config.dispatcher_interval(),
        )
    }

    /// Run one dispatcher pass inline (tests, tooling).
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, StoreError> {
        self.dispatcher().reconcile_once().await
    }

    /// Spawn the worker pool, the dispatcher and the GC loop. No-op when
    /// already running.
    pub async fn start(&self) {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                size: self.config.worker_pool_size,
                visibility_timeout: self.config.visibility_timeout(),
                lease_wait: self.config.lease_wait(),
            },
            WorkerDeps {
                queue: self.stores.queue.clone(),
                results: self.stores.results.clone(),
                registry: self.registry.clone(),
                clock: self.clock.clone(),
                ids: self.ids.clone(),
            },
        );
        let gc = GcLoop::new(
            self.stores.queue.clone(),
            self.stores.results.clone(),
            self.clock.clone(),
            self.config.result_retention(),
            self.config.gc_interval(),
        );
        let loops = vec![
            self.dispatcher().spawn(shutdown_rx.clone()),
            gc.spawn(shutdown_rx),
        ];

        tracing::info!(
            workers = self.config.worker_pool_size,
            task_types = ?self.registry.registered_types(),
            "runtime started"
        );
        *background = Some(Background {
            shutdown_tx,
            pool,
            loops,
        });
    }

    pub async fn is_running(&self) -> bool {
        self.background.lock().await.is_some()
    }

    /// Stop taking work, wait for in-flight jobs, stop the loops, close the
    /// stores.
    pub async fn shutdown(&self) {
        let background = self.background.lock().await.take();
        if let Some(bg) = background {
            bg.pool.shutdown_and_join().await;
            bg.shutdown_tx.send_replace(true);
            for handle in bg.loops {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "background loop ended abnormally");
                }
            }
        }

        self.stores.queue.close().await;
        self.stores.results.close().await;
        tracing::info!("runtime stopped");
    }
}
