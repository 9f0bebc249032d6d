//! InMemoryDeadLetters - dead letter の保管（開発用）

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{DeadLetter, StoreError};
use crate::ports::DeadLetterSink;

/// Bounded in-memory sink; the oldest letter is dropped once `capacity` is hit.
pub struct InMemoryDeadLetters {
    letters: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl InMemoryDeadLetters {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            letters: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }
}

impl Default for InMemoryDeadLetters {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn record(&self, letter: DeadLetter) -> Result<(), StoreError> {
        let mut letters = self.letters.lock().await;
        if letters.len() == self.capacity {
            letters.pop_front();
        }
        letters.push_back(letter);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError> {
        let letters = self.letters.lock().await;
        Ok(letters.iter().rev().take(limit).cloned().collect())
    }
}
