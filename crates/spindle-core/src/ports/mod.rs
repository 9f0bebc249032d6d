//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は backing store（in-memory, Redis, PostgreSQL など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! - `QueueStore`: pending jobs と lease（atomic な lease / ack / nack / renew）
//! - `ResultStore`: terminal な job record（retention 付き）
//! - `DeadLetterSink`: max_attempts を使い切った job の行き先
//! - `Clock` / `IdGenerator`: テスト容易性のための抽象化

pub mod clock;
pub mod dead_letter;
pub mod id_generator;
pub mod queue_store;
pub mod result_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::dead_letter::DeadLetterSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue_store::{CancelOutcome, QueueStore};
pub use self::result_store::ResultStore;
