pub mod error;
pub mod offline_queue;

pub use self::error::StorageError;
pub use self::offline_queue::{MemoryQueueStore, QueueStore, SledQueueStore, StoredQueue};
