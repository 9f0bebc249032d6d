//! Task trait - 型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Associated Types (`type Output`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は task_type と payload の型、handler の戻り値の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Add {
///     x: i64,
///     y: i64,
/// }
///
/// impl Task for Add {
///     const TYPE: &'static str = "demo.math.add.v1";
///     type Output = i64;
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: envelope の payload (JSON bytes) との相互変換
/// - `Send + Sync + 'static`: worker slot の task に move できるため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// task_type の定義
    ///
    /// # 命名規約
    /// - `{namespace}.{domain}.{action}.v{major}`
    /// - 例: `acme.billing.charge.v1`
    const TYPE: &'static str;

    /// handler の成功時の戻り値（result store に JSON で保存される）
    type Output: Serialize + DeserializeOwned + Send + 'static;
}
