//! DeadLetterSink port - where exhausted jobs end up.

use async_trait::async_trait;

use crate::domain::{DeadLetter, StoreError};

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter) -> Result<(), StoreError>;

    /// Most recent letters first, at most `limit`.
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError>;
}
