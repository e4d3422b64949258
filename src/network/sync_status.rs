use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::action::{ActionId, ActionKind};

/// One failed attempt within a drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure {
    pub id: ActionId,
    pub kind: ActionKind,
    pub error: String,
    /// Whether the failure removed the record from the queue.
    pub evicted: bool,
}

/// Aggregate outcome of one drain pass. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub synced_count: usize,
    pub failed_count: usize,
    /// Failures in the order the records were attempted.
    pub errors: Vec<ActionFailure>,
}

impl SyncResult {
    /// Nothing attempted: offline or empty queue.
    pub fn idle() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

/// In-memory state describing the most recent drain pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatusState {
    /// Queue length after the last pass.
    pub pending_actions: u64,
    /// Number of actions applied in the last pass.
    pub last_synced: u64,
    pub last_failed: u64,
    /// Timestamp of the last pass, in milliseconds since UNIX_EPOCH.
    pub last_sync_ts_ms: u64,
    /// First error of the last pass, if any.
    pub last_error: Option<String>,
    /// Number of entries in the dead-letter list.
    pub dead_letters: u64,
}

pub type SharedSyncStatus = Arc<Mutex<SyncStatusState>>;
