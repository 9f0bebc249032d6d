//! Queue module: entry state machine, retry policy, and the in-memory store.

mod entry;
mod memory;
mod retry;
mod state;

pub use entry::QueueEntry;
pub use memory::InMemoryQueueStore;
pub use retry::RetryPolicy;
pub use state::{QueueJobState, QueueStats};
