use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use crate::action::{encode_json_payload, ActionId, ActionKind, ActionProcessor, ActionRecord};
use crate::common::timestamp::Clock;
use crate::config::{EngineConfig, StorageConfig};
use crate::error::{Result, SyncError};
use crate::network::{
    ActionQueue, ConnectivityMonitor, ConnectivityProbe, DeadLetter, DeadLetterList,
    MetricsSnapshot, NetworkGate, RetryPolicy, SharedSyncStatus, SyncMetrics, SyncProcessor,
    SyncResult, SyncStatusState,
};
use crate::storage::{MemoryQueueStore, QueueStore, SledQueueStore};

/// In-process sync engine: queue, gate, processor and dead letters wired
/// together for one domain.
///
/// Construct with [`SyncEngine::init`] and shut down with
/// [`SyncEngine::dispose`]. Instances share nothing, so several can run side
/// by side.
pub struct SyncEngine {
    config: EngineConfig,
    queue: Arc<ActionQueue>,
    processor: Arc<SyncProcessor>,
    gate: Arc<NetworkGate>,
    dead_letters: Arc<DeadLetterList>,
    status: SharedSyncStatus,
    metrics: Arc<SyncMetrics>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Open the configured store, recover pending actions and wire the engine.
    ///
    /// `processor` is usually a [`ProcessorRegistry`](crate::action::ProcessorRegistry).
    pub fn init<P>(config: EngineConfig, processor: P) -> Result<Self>
    where
        P: ActionProcessor + 'static,
    {
        config.validate()?;

        let store: Box<dyn QueueStore> = match &config.storage {
            StorageConfig::Memory => Box::new(MemoryQueueStore::new()),
            StorageConfig::Sled { data_dir } => Box::new(SledQueueStore::open(data_dir)?),
        };
        Self::with_store(config, store, Arc::new(processor))
    }

    /// Like [`init`](Self::init) but over a caller-provided store.
    pub fn with_store(
        config: EngineConfig,
        store: Box<dyn QueueStore>,
        processor: Arc<dyn ActionProcessor>,
    ) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(ActionQueue::open(
            store,
            Clock::new(config.device_id),
            config.queue_capacity,
            config.overflow,
        )?);
        let (online_tx, online_rx) = watch::channel(config.start_online);
        let dead_letters = Arc::new(DeadLetterList::new(config.dead_letter_capacity));
        let status: SharedSyncStatus = Arc::new(TokioMutex::new(SyncStatusState {
            pending_actions: queue.len() as u64,
            ..SyncStatusState::default()
        }));
        let metrics = Arc::new(SyncMetrics::default());

        let processor = Arc::new(SyncProcessor::new(
            Arc::clone(&queue),
            processor,
            RetryPolicy::new(config.max_retries),
            config.process_timeout(),
            online_rx,
            Arc::clone(&dead_letters),
            Arc::clone(&status),
            Arc::clone(&metrics),
        ));
        let gate = Arc::new(NetworkGate::new(
            online_tx,
            Arc::clone(&queue),
            Arc::clone(&processor),
        ));

        log::info!(
            "Sync engine ready (device={}, pending={}, online={})",
            config.device_id,
            queue.len(),
            config.start_online
        );

        Ok(Self {
            config,
            queue,
            processor,
            gate,
            dead_letters,
            status,
            metrics,
            monitor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Defer a mutation. Returns immediately, online or not.
    pub fn enqueue<K: Into<ActionKind>>(&self, kind: K, payload: Vec<u8>) -> Result<ActionId> {
        Ok(self.queue.enqueue(kind.into(), payload)?)
    }

    pub fn enqueue_json<K, T>(&self, kind: K, payload: &T) -> Result<ActionId>
    where
        K: Into<ActionKind>,
        T: Serialize,
    {
        let bytes = encode_json_payload(payload)?;
        self.enqueue(kind, bytes)
    }

    pub fn remove(&self, id: ActionId) -> Result<bool> {
        Ok(self.queue.remove(id)?)
    }

    pub fn clear(&self) -> Result<()> {
        Ok(self.queue.clear()?)
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn snapshot(&self) -> Vec<ActionRecord> {
        self.queue.snapshot()
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    pub async fn drain(&self) -> SyncResult {
        self.processor.drain().await
    }

    /// For an explicit "sync now" control.
    pub async fn retry_failed_actions(&self) -> SyncResult {
        self.processor.retry_failed_actions().await
    }

    pub fn set_connectivity(&self, online: bool) -> Option<JoinHandle<SyncResult>> {
        self.gate.set_connectivity(online)
    }

    pub fn is_online(&self) -> bool {
        self.gate.is_online()
    }

    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.gate.subscribe()
    }

    /// Start polling `probe` every `interval`, replacing any running monitor.
    pub fn spawn_monitor(&self, probe: Arc<dyn ConnectivityProbe>, interval: Duration) {
        let monitor = ConnectivityMonitor::new(probe, Arc::clone(&self.gate), interval);
        let handle = tokio::spawn(monitor.run());
        let previous = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.list()
    }

    /// Put an evicted action back at the end of the queue with a fresh
    /// retry budget. Returns the new id.
    pub fn requeue_dead_letter(&self, id: ActionId) -> Result<ActionId> {
        let letter = self
            .dead_letters
            .take(id)
            .ok_or(SyncError::UnknownDeadLetter(id))?;
        let record = letter.record;
        match self.queue.enqueue(record.kind.clone(), record.payload.clone()) {
            Ok(new_id) => {
                log::info!("Requeued dead letter {id} as action {new_id}");
                Ok(new_id)
            }
            Err(e) => {
                self.dead_letters.push(record, letter.reason);
                Err(e.into())
            }
        }
    }

    pub fn clear_dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.clear()
    }

    pub async fn status(&self) -> SyncStatusState {
        let mut status = self.status.lock().await.clone();
        status.pending_actions = self.queue.len() as u64;
        status.dead_letters = self.dead_letters.len() as u64;
        status
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the monitor, let a running drain finish and flush the store.
    ///
    /// Drains requested after this point, including ones spawned by the
    /// gate and still waiting for the running pass, do nothing.
    pub async fn dispose(self) -> Result<()> {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = monitor {
            handle.abort();
            let _ = handle.await;
        }

        self.processor.shutdown().await;
        self.queue.flush_async().await?;
        log::info!("Sync engine disposed with {} pending actions", self.queue.len());
        Ok(())
    }
}
