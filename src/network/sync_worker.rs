use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex as TokioMutex};
use tokio::time::timeout;

use crate::action::{ActionId, ActionProcessor, ActionRecord, ProcessError};
use crate::common::timestamp::unix_millis;
use crate::network::dead_letter::DeadLetterList;
use crate::network::metrics::SyncMetrics;
use crate::network::offline_queue::ActionQueue;
use crate::network::retry::{Outcome, RetryPolicy};
use crate::network::sync_status::{ActionFailure, SharedSyncStatus, SyncResult};

/// Drains the action queue against an [`ActionProcessor`].
///
/// Passes are single-flight: a second `drain` waits for the running one to
/// finish and then takes its own snapshot, so no record is ever handed to
/// the processor by two passes at once.
///
/// After [`shutdown`](Self::shutdown) every drain, including ones already
/// waiting for the running pass, returns an idle result.
pub struct SyncProcessor {
    queue: Arc<ActionQueue>,
    processor: Arc<dyn ActionProcessor>,
    policy: RetryPolicy,
    process_timeout: Option<Duration>,
    online: watch::Receiver<bool>,
    dead_letters: Arc<DeadLetterList>,
    status: SharedSyncStatus,
    metrics: Arc<SyncMetrics>,
    in_flight: TokioMutex<()>,
    closed: AtomicBool,
}

impl SyncProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<ActionQueue>,
        processor: Arc<dyn ActionProcessor>,
        policy: RetryPolicy,
        process_timeout: Option<Duration>,
        online: watch::Receiver<bool>,
        dead_letters: Arc<DeadLetterList>,
        status: SharedSyncStatus,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            queue,
            processor,
            policy,
            process_timeout,
            online,
            dead_letters,
            status,
            metrics,
            in_flight: TokioMutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Whether a pass is currently running.
    pub fn is_draining(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse further passes and wait for the running one, if any.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.in_flight.lock().await;
        log::debug!("Sync processor closed");
    }

    fn should_skip(&self) -> bool {
        if self.is_closed() {
            log::debug!("Skipping drain: processor closed");
            return true;
        }
        if !self.is_online() {
            log::debug!("Skipping drain: offline ({} actions pending)", self.queue.len());
            return true;
        }
        false
    }

    /// Run one pass over the queue.
    ///
    /// Offline, this returns an idle result without touching the queue.
    /// Online, every record present when the pass starts is attempted once,
    /// sequentially and in FIFO order.
    pub async fn drain(&self) -> SyncResult {
        // Offline never waits behind a running pass.
        if self.should_skip() {
            return SyncResult::idle();
        }
        let _guard = self.in_flight.lock().await;
        if self.should_skip() {
            return SyncResult::idle();
        }

        let snapshot = self.queue.snapshot();
        if snapshot.is_empty() {
            return SyncResult::idle();
        }

        log::info!("Draining {} queued actions", snapshot.len());
        let attempted: HashSet<ActionId> = snapshot.iter().map(|r| r.id).collect();

        let mut attempts = Vec::with_capacity(snapshot.len());
        for record in snapshot {
            let outcome = match self.process_one(&record).await {
                Ok(()) => Outcome::Synced,
                Err(e) => {
                    log::warn!(
                        "Action {} ({}) failed on attempt {}: {e}",
                        record.id,
                        record.kind,
                        record.retry_count + 1
                    );
                    Outcome::Failed(e)
                }
            };
            attempts.push((record, outcome));
        }

        let errors: Vec<ActionFailure> = attempts
            .iter()
            .filter_map(|(record, outcome)| match outcome {
                Outcome::Failed(e) => Some(ActionFailure {
                    id: record.id,
                    kind: record.kind.clone(),
                    error: e.to_string(),
                    evicted: false,
                }),
                Outcome::Synced => None,
            })
            .collect();

        let reduction = self.policy.reduce(attempts);
        let evicted_ids: HashSet<ActionId> = reduction.evicted.iter().map(|(r, _)| r.id).collect();
        let errors: Vec<ActionFailure> = errors
            .into_iter()
            .map(|mut failure| {
                failure.evicted = evicted_ids.contains(&failure.id);
                failure
            })
            .collect();

        for (record, reason) in &reduction.evicted {
            log::error!(
                "Evicting action {} ({}) after {} attempts ({:?}): {}",
                record.id,
                record.kind,
                record.retry_count,
                reason,
                record.last_error.as_deref().unwrap_or("unknown error")
            );
        }

        if let Err(e) = self.queue.apply_pass(&attempted, reduction.retained) {
            log::error!("Failed to persist drain pass results: {e}");
        }
        for (record, reason) in reduction.evicted {
            self.dead_letters.push(record, reason);
        }

        let result = SyncResult {
            success: errors.is_empty(),
            synced_count: reduction.synced,
            failed_count: errors.len(),
            errors,
        };

        self.metrics
            .record_pass(result.synced_count, result.failed_count, evicted_ids.len());
        {
            let mut status = self.status.lock().await;
            status.pending_actions = self.queue.len() as u64;
            status.last_synced = result.synced_count as u64;
            status.last_failed = result.failed_count as u64;
            status.last_sync_ts_ms = unix_millis();
            status.last_error = result.errors.first().map(|f| f.error.clone());
            status.dead_letters = self.dead_letters.len() as u64;
        }

        log::info!(
            "Drain finished: synced={} failed={} evicted={} pending={}",
            result.synced_count,
            result.failed_count,
            evicted_ids.len(),
            self.queue.len()
        );
        result
    }

    /// Manual "sync now" entry point; same contract as [`drain`](Self::drain).
    pub async fn retry_failed_actions(&self) -> SyncResult {
        self.drain().await
    }

    async fn process_one(&self, record: &ActionRecord) -> Result<(), ProcessError> {
        match self.process_timeout {
            Some(limit) => match timeout(limit, self.processor.process(record)).await {
                Ok(res) => res,
                Err(_) => Err(ProcessError::Timeout(limit)),
            },
            None => self.processor.process(record).await,
        }
    }
}
