//! IdGenerator port - ID 生成の抽象化
//!
//! 分散環境（複数 producer / 複数 worker）で使える ID を生成するためのインターフェース。
//! テスト容易性のために trait として抽象化しています。

use crate::domain::ids::{JobId, WorkerToken};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の worker slot から使える）
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    fn generate_worker_token(&self) -> WorkerToken;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の時刻を timestamp 部分に使うので、ManualClock と組み合わせると
/// timestamp 部分が決定的になります（ランダム部分は毎回異なる）。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next_ulid())
    }

    fn generate_worker_token(&self) -> WorkerToken {
        WorkerToken::from(self.next_ulid())
    }
}
