use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::{ActionId, ActionKind, ActionRecord};
use crate::common::timestamp::Clock;
use crate::storage::{MemoryQueueStore, QueueStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    #[default]
    RejectNew,
    DropOldest,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Action queue is full ({0} records)")]
    QueueFull(usize),

    #[error("Queue storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

struct Inner {
    records: VecDeque<ActionRecord>,
    last_id: u64,
    store: Box<dyn QueueStore>,
}

/// Ordered, durable collection of pending actions.
///
/// Unbounded unless a capacity is set, in which case the overflow strategy
/// decides between refusing the new record and discarding the oldest one.
/// Every mutation is written through to the backing [`QueueStore`].
pub struct ActionQueue {
    inner: Mutex<Inner>,
    clock: Clock,
    capacity: Option<usize>,
    strategy: OverflowStrategy,
}

impl ActionQueue {
    /// Build a queue over `store`, recovering whatever it already holds.
    pub fn open(
        store: Box<dyn QueueStore>,
        clock: Clock,
        capacity: Option<usize>,
        strategy: OverflowStrategy,
    ) -> Result<Self> {
        let stored = store.load()?;

        for record in &stored.records {
            if let Err(e) = clock.observe(&record.enqueued_at) {
                log::warn!("Ignoring clock drift from recovered action {}: {e}", record.id);
            }
        }
        if !stored.records.is_empty() {
            log::info!(
                "Recovered {} pending actions from queue store",
                stored.records.len()
            );
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                records: stored.records.into(),
                last_id: stored.last_id,
                store,
            }),
            clock,
            capacity,
            strategy,
        })
    }

    /// Unbounded queue with no persistence.
    pub fn in_memory(clock: Clock) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: VecDeque::new(),
                last_id: 0,
                store: Box::new(MemoryQueueStore::new()),
            }),
            clock,
            capacity: None,
            strategy: OverflowStrategy::RejectNew,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Append a new action at the back of the queue and return its id.
    ///
    /// Connectivity is irrelevant here; with no capacity configured this only
    /// fails if the backing store does.
    pub fn enqueue(&self, kind: ActionKind, payload: Vec<u8>) -> Result<ActionId> {
        let mut inner = self.lock();

        if let Some(capacity) = self.capacity {
            if inner.records.len() >= capacity {
                match self.strategy {
                    OverflowStrategy::RejectNew => {
                        log::warn!("Action queue full ({capacity}), rejecting '{kind}'");
                        return Err(QueueError::QueueFull(capacity));
                    }
                    OverflowStrategy::DropOldest => {
                        if let Some(dropped) = inner.records.front().map(|r| r.id) {
                            inner.store.remove(dropped)?;
                            inner.records.pop_front();
                            log::warn!(
                                "Action queue full ({capacity}), dropped oldest action {dropped}"
                            );
                        }
                    }
                }
            }
        }

        let id = ActionId(inner.last_id.wrapping_add(1));
        let record = ActionRecord::new(id, kind, payload, self.clock.now());
        inner.store.put(&record)?;
        inner.last_id = id.0;
        log::debug!("Enqueued action {} ({})", record.id, record.kind);
        inner.records.push_back(record);
        Ok(id)
    }

    /// Remove a single record. Returns whether it was present.
    pub fn remove(&self, id: ActionId) -> Result<bool> {
        let mut inner = self.lock();
        let Some(pos) = inner.records.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        inner.store.remove(id)?;
        inner.records.remove(pos);
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.store.clear()?;
        inner.records.clear();
        Ok(())
    }

    pub fn get(&self, id: ActionId) -> Option<ActionRecord> {
        self.lock().records.iter().find(|r| r.id == id).cloned()
    }

    /// Read-only copy of the queue in FIFO order.
    pub fn snapshot(&self) -> Vec<ActionRecord> {
        self.lock().records.iter().cloned().collect()
    }

    /// Fold the outcome of a drain pass back into the live queue.
    ///
    /// `attempted` holds the ids of the pass snapshot and `retained` the new
    /// versions of the records to keep. Snapshot records not retained are
    /// removed. Anything enqueued while the pass ran is left alone, and a
    /// snapshot record removed while the pass ran stays removed. Relative
    /// order is unchanged.
    pub fn apply_pass(&self, attempted: &HashSet<ActionId>, retained: Vec<ActionRecord>) -> Result<()> {
        let mut retained: HashMap<ActionId, ActionRecord> =
            retained.into_iter().map(|r| (r.id, r)).collect();

        let mut inner = self.lock();
        let current = std::mem::take(&mut inner.records);
        let mut next = VecDeque::with_capacity(current.len());
        let mut first_err = None;

        for record in current {
            if !attempted.contains(&record.id) {
                next.push_back(record);
                continue;
            }
            let write = match retained.remove(&record.id) {
                Some(updated) => {
                    let res = inner.store.put(&updated);
                    next.push_back(updated);
                    res
                }
                None => inner.store.remove(record.id),
            };
            if let Err(e) = write {
                first_err.get_or_insert(e);
            }
        }

        inner.records = next;
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.lock().store.flush()?;
        Ok(())
    }

    /// Flush without blocking the runtime when the store is sled backed.
    pub async fn flush_async(&self) -> Result<()> {
        let db = self.lock().store.sled_db();
        match db {
            Some(db) => {
                db.flush_async().await.map_err(StorageError::from)?;
                Ok(())
            }
            None => self.flush(),
        }
    }
}
