//! Impls - ports の in-memory 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryResultStore**: terminal record の保管
//! - **InMemoryDeadLetters**: dead letter の保管
//!
//! queue store の in-memory 実装は `queue::InMemoryQueueStore` にあります。

pub mod dead_letters;
pub mod result_store;

pub use self::dead_letters::InMemoryDeadLetters;
pub use self::result_store::InMemoryResultStore;
