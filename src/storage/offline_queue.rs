use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::action::{ActionId, ActionRecord};
use crate::storage::error::StorageError;

/// Queue contents recovered from a store, in FIFO order.
#[derive(Debug, Default)]
pub struct StoredQueue {
    pub records: Vec<ActionRecord>,
    /// Highest id ever handed out, including ids of records already removed.
    pub last_id: u64,
}

/// Durable backing for the action queue.
///
/// The queue keeps its working set in memory and writes every change
/// through to the store, so a restart recovers exactly the pending records.
pub trait QueueStore: Send {
    fn load(&self) -> Result<StoredQueue, StorageError>;

    /// Insert or overwrite a record and remember `record.id` as the last issued id.
    fn put(&mut self, record: &ActionRecord) -> Result<(), StorageError>;

    fn remove(&mut self, id: ActionId) -> Result<(), StorageError>;

    /// Drop every record. The last issued id is kept so ids are never reused.
    fn clear(&mut self) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Handle for an async flush, when the store is sled backed.
    fn sled_db(&self) -> Option<sled::Db> {
        None
    }
}

/// Store for tests and ephemeral engines; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    records: BTreeMap<u64, ActionRecord>,
    last_id: u64,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn load(&self) -> Result<StoredQueue, StorageError> {
        Ok(StoredQueue {
            records: self.records.values().cloned().collect(),
            last_id: self.last_id,
        })
    }

    fn put(&mut self, record: &ActionRecord) -> Result<(), StorageError> {
        self.last_id = self.last_id.max(record.id.0);
        self.records.insert(record.id.0, record.clone());
        Ok(())
    }

    fn remove(&mut self, id: ActionId) -> Result<(), StorageError> {
        self.records.remove(&id.0);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.records.clear();
        Ok(())
    }
}

/// Persistent queue store backed by a dedicated Sled tree.
///
/// Record keys are the id encoded big-endian so that tree iteration order
/// is enqueue order (FIFO). A separate metadata key remembers the last id
/// handed out so ids never repeat, even after the queue has been emptied.
pub struct SledQueueStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledQueueStore {
    const TREE_NAME: &'static str = "__action_queue__";
    const META_LAST_ID_KEY: &'static [u8] = b"__last_id__";
    const LOCK_RETRIES: u32 = 20;
    const LOCK_RETRY_STEP: Duration = Duration::from_millis(10);

    /// Open (or create) the sled database under `data_dir`.
    ///
    /// A database dropped moments ago can still hold the directory lock
    /// while sled's flusher thread winds down, so lock contention is retried
    /// with a linear backoff (about two seconds in total) before giving up.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let path = data_dir.as_ref();
        std::fs::create_dir_all(path)?;

        let mut attempt = 0;
        let db = loop {
            match sled::open(path) {
                Ok(db) => break db,
                Err(e) if is_lock_contention(&e) && attempt < Self::LOCK_RETRIES => {
                    attempt += 1;
                    log::debug!("Queue store at {path:?} is still locked, retry {attempt}");
                    std::thread::sleep(Self::LOCK_RETRY_STEP * attempt);
                }
                Err(e) => return Err(e.into()),
            }
        };
        log::info!("Action queue store opened at {:?}", path);
        Self::with_db(db)
    }

    /// Use a tree inside an already opened database.
    pub fn with_db(db: sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { db, tree })
    }

    fn decode(value: &[u8]) -> Result<ActionRecord, StorageError> {
        let (record, _): (ActionRecord, usize) =
            bincode::serde::decode_from_slice(value, bincode::config::standard())
                .map_err(|e| StorageError::DecodeError(e.to_string()))?;
        Ok(record)
    }

    fn read_last_id(&self) -> Result<Option<u64>, StorageError> {
        let Some(bytes) = self.tree.get(Self::META_LAST_ID_KEY)? else {
            return Ok(None);
        };
        let arr: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
            StorageError::DecodeError(format!(
                "last id marker has {} bytes, expected 8",
                bytes.len()
            ))
        })?;
        Ok(Some(u64::from_be_bytes(arr)))
    }
}

impl QueueStore for SledQueueStore {
    fn load(&self) -> Result<StoredQueue, StorageError> {
        let mut records = Vec::new();
        let mut highest_key: u64 = 0;

        for item in self.tree.iter() {
            let (key, value) = item?;

            // Only 8-byte keys are records; anything else is metadata.
            let Ok(id_bytes) = <[u8; 8]>::try_from(key.as_ref()) else {
                continue;
            };
            highest_key = highest_key.max(u64::from_be_bytes(id_bytes));
            records.push(Self::decode(&value)?);
        }

        let last_id = self.read_last_id()?.unwrap_or(0).max(highest_key);
        Ok(StoredQueue { records, last_id })
    }

    fn put(&mut self, record: &ActionRecord) -> Result<(), StorageError> {
        let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| StorageError::EncodeError(e.to_string()))?;

        let last_id = self.read_last_id()?.unwrap_or(0).max(record.id.0);

        let mut batch = sled::Batch::default();
        batch.insert(&record.id.0.to_be_bytes()[..], bytes);
        batch.insert(Self::META_LAST_ID_KEY, &last_id.to_be_bytes()[..]);
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    fn remove(&mut self, id: ActionId) -> Result<(), StorageError> {
        self.tree.remove(id.0.to_be_bytes())?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for key in self.tree.iter().keys() {
            let key = key?;
            if key.len() == 8 {
                batch.remove(key);
            }
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn sled_db(&self) -> Option<sled::Db> {
        Some(self.db.clone())
    }
}

/// Another handle, in this process or another, owns the directory lock.
fn is_lock_contention(err: &sled::Error) -> bool {
    match err {
        sled::Error::Io(io) => {
            io.kind() == std::io::ErrorKind::WouldBlock
                || io.to_string().contains("could not acquire lock")
        }
        _ => false,
    }
}
