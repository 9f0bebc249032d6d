//! Handler trait - Task を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec::PayloadCodec;
use super::context::JobContext;
use super::task::Task;
use crate::domain::HandlerError;

/// Handler は Task を実行して `T::Output` を返す
///
/// # 使用例
/// ```ignore
/// struct AddHandler;
///
/// #[async_trait]
/// impl Handler<Add> for AddHandler {
///     async fn handle(&self, _ctx: &JobContext, task: Add) -> Result<i64, HandlerError> {
///         Ok(task.x + task.y)
///     }
/// }
/// ```
///
/// # ジェネリクスによる型安全性
/// - `Handler<Add>` は `Add` しか受け取れない
/// - コンパイル時に Task と Handler の対応が保証される
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: &JobContext, task: T) -> Result<T::Output, HandlerError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// payload bytes を受け取り、result bytes を返す。
/// HashMap<String, Arc<dyn DynHandler>> に格納可能にします。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, ctx: &JobContext, payload: &[u8]) -> Result<Vec<u8>, HandlerError>;
    fn task_type(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, ctx: &JobContext, payload: &[u8]) -> Result<Vec<u8>, HandlerError> {
        // 壊れた payload は何度やっても壊れている
        let task = PayloadCodec::decode_task::<T>(payload)
            .map_err(|e| HandlerError::permanent(e.to_string()))?;
        let output = self.handler.handle(ctx, task).await?;
        PayloadCodec::encode_output::<T>(&output).map_err(|e| HandlerError::permanent(e.to_string()))
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}
