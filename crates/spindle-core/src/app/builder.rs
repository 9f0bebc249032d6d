//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use super::runtime::{Runtime, Stores};
use crate::config::{ConfigError, SpindleConfig};
use crate::domain::{Decider, DefaultDecider};
use crate::ports::{Clock, SystemClock};
use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

/// AppBuilder は Runtime を構築
///
/// # 使用例
/// ```ignore
/// let runtime = AppBuilder::new()
///     .register::<Add, _>(AddHandler)?
///     .expect_tasks(&["demo.math.add.v1"])
///     .config(config)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」と config をチェック
/// - 不足があれば BuildError を返す
pub struct AppBuilder {
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
    config: SpindleConfig,
    clock: Option<Arc<dyn Clock>>,
    stores: Option<Stores>,
    decider: Option<Arc<dyn Decider>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AppBuilder {
    /// 新しい AppBuilder を作成
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_tasks: None,
            config: SpindleConfig::default(),
            clock: None,
            stores: None,
            decider: None,
        }
    }

    /// Handler を登録
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn config(mut self, config: SpindleConfig) -> Self {
        self.config = config;
        self
    }

    /// 時刻源を差し替える（テスト用）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// `store_url` を無視して、渡された stores を使う
    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// 検証して Runtime を生成（起動はしない）
    ///
    /// # 検証
    /// - expect_tasks() で設定された task_type が全て登録されているか
    /// - config が妥当か、store_url が開けるか
    pub fn build(self) -> Result<Runtime, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let stores = match self.stores {
            Some(stores) => stores,
            None => Stores::open(&self.config.store_url, clock.clone())?,
        };
        let decider = self
            .decider
            .unwrap_or_else(|| Arc::new(DefaultDecider::new(self.config.retry_policy())));

        Ok(Runtime::from_parts(
            self.config,
            self.registry,
            stores,
            decider,
            clock,
        ))
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}
