pub mod connectivity;
pub mod dead_letter;
pub mod metrics;
pub mod offline_queue;
pub mod retry;
pub mod sync_status;
pub mod sync_worker;

pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, NetworkGate, TcpProbe};
pub use dead_letter::{DeadLetter, DeadLetterList};
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use offline_queue::{ActionQueue, OverflowStrategy, QueueError};
pub use retry::{Disposition, EvictionReason, Outcome, Reduction, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use sync_status::{ActionFailure, SharedSyncStatus, SyncResult, SyncStatusState};
pub use sync_worker::SyncProcessor;

#[cfg(test)]
pub(crate) static TEST_ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
