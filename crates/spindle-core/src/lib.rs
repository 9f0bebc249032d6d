//! spindle-core
//!
//! Job queue and worker-dispatch engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, lease, job record, decision, errors）
//! - **ports**: 抽象化レイヤー（QueueStore, ResultStore, DeadLetterSink, Clock, IdGenerator）
//! - **queue**: queue entry の状態機械、RetryPolicy、InMemoryQueueStore
//! - **impls**: ports の in-memory 実装（InMemoryResultStore, InMemoryDeadLetters）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry, PayloadCodec）
//! - **app**: アプリケーションロジック（builder, runtime, worker pool, dispatcher, gc）
//! - **config**: SpindleConfig（TOML + serde defaults）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{AppBuilder, Runtime, SubmitError, SubmitRequest};
pub use config::{ConfigError, SpindleConfig};
pub use domain::{HandlerError, JobId, JobState, JobStatus, Priority, StoreError, TaskType};
pub use typed::{Handler, JobContext, Task, TypedRegistry};
