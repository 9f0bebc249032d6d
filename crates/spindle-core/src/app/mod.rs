//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **Runtime**: submit / status / cancel と起動・停止の facade
//! - **WorkerPool**: ジョブ実行ループ（lease→handle→ack/nack→record）
//! - **Dispatcher**: lease 期限切れの回収と retry / dead の判断
//! - **GcLoop**: retention を過ぎた record の削除

pub mod builder;
pub mod gc_loop;
pub mod reaper_loop;
pub mod runtime;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{AppBuilder, BuildError};
pub use self::gc_loop::{GcLoop, GcReport};
pub use self::reaper_loop::{Dispatcher, ReconcileReport};
pub use self::runtime::{Runtime, Stores, SubmitError, SubmitRequest};
pub use self::worker_loop::{WorkerDeps, WorkerPool, WorkerPoolConfig};
