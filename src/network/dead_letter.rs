use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::action::{ActionId, ActionRecord};
use crate::common::timestamp::unix_millis;
use crate::network::retry::EvictionReason;

/// An abandoned action, kept so the user can inspect or resubmit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub record: ActionRecord,
    pub reason: EvictionReason,
    pub evicted_at_ms: u64,
}

/// Bounded, in-memory list of evicted actions. Oldest entries fall off first.
///
/// A capacity of zero keeps nothing.
pub struct DeadLetterList {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl DeadLetterList {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeadLetter>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, record: ActionRecord, reason: EvictionReason) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            if let Some(dropped) = entries.pop_front() {
                log::warn!("Dead-letter list full, discarding action {}", dropped.record.id);
            }
        }
        entries.push_back(DeadLetter {
            record,
            reason,
            evicted_at_ms: unix_millis(),
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn list(&self) -> Vec<DeadLetter> {
        self.lock().iter().cloned().collect()
    }

    /// Remove and return one entry.
    pub fn take(&self, id: ActionId) -> Option<DeadLetter> {
        let mut entries = self.lock();
        let pos = entries.iter().position(|d| d.record.id == id)?;
        entries.remove(pos)
    }

    pub fn clear(&self) -> Vec<DeadLetter> {
        self.lock().drain(..).collect()
    }
}
