use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lifetime counters for one engine instance.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    passes: AtomicU64,
    synced: AtomicU64,
    failed: AtomicU64,
    evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub passes: u64,
    pub synced: u64,
    pub failed: u64,
    pub evicted: u64,
}

impl SyncMetrics {
    pub fn record_pass(&self, synced: usize, failed: usize, evicted: usize) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.synced.fetch_add(synced as u64, Ordering::Relaxed);
        self.failed.fetch_add(failed as u64, Ordering::Relaxed);
        self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            synced: self.synced.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}
