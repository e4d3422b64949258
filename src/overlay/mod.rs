//! Optimistic local projection over confirmed remote state.
//!
//! Two ways to get a mutation to the remote store go through here:
//!
//! * [`OptimisticOverlay::apply_optimistic`] writes the intended value, makes
//!   the remote call directly and either confirms or reverts. A failed call is
//!   reported to the caller and is *not* queued for retry; queueing it is the
//!   caller's decision.
//! * [`OptimisticOverlay::write_pending`] followed later by
//!   [`OptimisticOverlay::reconcile`] batches several local writes into one
//!   upsert. Failed batches stay pending for the next attempt.
//!
//! Either way the overlay finishes with a full [`Reloader::reload`], so local
//! state never diverges from the source for longer than one round trip.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::Serialize;

use crate::common::timestamp::{unix_millis, Clock, HybridTimestamp};

/// Reads the latest confirmed state of the whole collection.
#[async_trait]
pub trait Reloader<K, V>: Send + Sync {
    async fn reload(&self) -> anyhow::Result<HashMap<K, V>>;
}

/// Writes several values to the remote store in one call. Must be an upsert.
#[async_trait]
pub trait BatchUpserter<K, V>: Send + Sync {
    async fn upsert_batch(&self, entries: Vec<(K, V)>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayEntry<V> {
    /// Value from the last authoritative reload. `None` if the entity only
    /// exists locally so far.
    pub confirmed: Option<V>,
    /// Locally intended value not yet confirmed.
    pub pending: Option<V>,
    pub pending_since: Option<HybridTimestamp>,
}

impl<V> OverlayEntry<V> {
    /// What readers see: the pending value if there is one.
    pub fn visible(&self) -> Option<&V> {
        self.pending.as_ref().or(self.confirmed.as_ref())
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Pending entries sent in the batch.
    pub attempted: usize,
    /// Entries cleared after the batch succeeded.
    pub cleared: usize,
    pub error: Option<String>,
    pub reloaded: bool,
}

pub struct OptimisticOverlay<K, V> {
    entries: RwLock<HashMap<K, OverlayEntry<V>>>,
    reloader: Arc<dyn Reloader<K, V>>,
    clock: Clock,
    last_sync_ms: AtomicU64,
}

impl<K, V> OptimisticOverlay<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(reloader: Arc<dyn Reloader<K, V>>, clock: Clock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            reloader,
            clock,
            last_sync_ms: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, OverlayEntry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, OverlayEntry<V>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.read().get(key).and_then(|e| e.visible().cloned())
    }

    pub fn entry(&self, key: &K) -> Option<OverlayEntry<V>> {
        self.read().get(key).cloned()
    }

    /// Every visible value, pending writes included.
    pub fn values(&self) -> HashMap<K, V> {
        self.read()
            .iter()
            .filter_map(|(k, e)| e.visible().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.read().values().filter(|e| e.is_pending()).count()
    }

    /// Milliseconds since UNIX_EPOCH of the last successful batch upsert.
    pub fn last_sync_time(&self) -> Option<u64> {
        match self.last_sync_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Record a local intent. Visible to readers immediately.
    ///
    /// Returns the stamp of this write; a later write to the same key
    /// supersedes it.
    pub fn write_pending(&self, key: K, value: V) -> HybridTimestamp {
        let since = self.clock.now();
        let mut entries = self.write();
        let entry = entries.entry(key).or_insert(OverlayEntry {
            confirmed: None,
            pending: None,
            pending_since: None,
        });
        entry.pending = Some(value);
        entry.pending_since = Some(since);
        since
    }

    /// Discard the pending value written at `since`, restoring the confirmed
    /// one. A newer write to the same key is left in place.
    pub fn revert(&self, key: &K, since: HybridTimestamp) -> bool {
        let mut entries = self.write();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if entry.pending_since != Some(since) {
            return false;
        }
        entry.pending = None;
        entry.pending_since = None;
        if entry.confirmed.is_none() {
            entries.remove(key);
        }
        true
    }

    /// Promote the pending value written at `since` to confirmed.
    fn confirm(&self, key: &K, since: HybridTimestamp) -> bool {
        let mut entries = self.write();
        match entries.get_mut(key) {
            Some(entry) if entry.pending_since == Some(since) => {
                entry.confirmed = entry.pending.take();
                entry.pending_since = None;
                true
            }
            _ => false,
        }
    }

    /// Replace confirmed values with the authoritative state.
    ///
    /// Pending values survive; entities missing from the source lose their
    /// confirmed value and disappear unless something local is pending.
    pub async fn reload(&self) -> anyhow::Result<usize> {
        let mut fresh = self.reloader.reload().await?;
        let count = fresh.len();

        let mut entries = self.write();
        entries.retain(|key, entry| {
            entry.confirmed = fresh.remove(key);
            entry.confirmed.is_some() || entry.pending.is_some()
        });
        for (key, value) in fresh {
            entries.insert(
                key,
                OverlayEntry {
                    confirmed: Some(value),
                    pending: None,
                    pending_since: None,
                },
            );
        }
        Ok(count)
    }

    async fn reload_logged(&self) -> bool {
        match self.reload().await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Authoritative reload failed, keeping local projection: {e:#}");
                false
            }
        }
    }

    /// Immediate-optimistic update.
    ///
    /// `value` is visible at once. `remote` performs the direct remote call.
    /// On success the entry is confirmed and the collection reloaded. On
    /// failure the entry reverts to its confirmed value and the remote error
    /// is returned unchanged.
    pub async fn apply_optimistic<F, Fut, T, E>(&self, key: K, value: V, remote: F) -> Result<T, E>
    where
        F: FnOnce(V) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let since = self.write_pending(key.clone(), value.clone());

        match remote(value).await {
            Ok(out) => {
                self.confirm(&key, since);
                self.reload_logged().await;
                Ok(out)
            }
            Err(e) => {
                log::warn!("Optimistic write to {key:?} failed, reverting: {e}");
                self.revert(&key, since);
                Err(e)
            }
        }
    }

    /// Send every pending entry in one batch upsert, then reload.
    pub async fn reconcile(&self, upserter: &dyn BatchUpserter<K, V>) -> ReconcileReport {
        let batch: Vec<(K, V, HybridTimestamp)> = self
            .read()
            .iter()
            .filter_map(|(k, e)| match (&e.pending, e.pending_since) {
                (Some(v), Some(since)) => Some((k.clone(), v.clone(), since)),
                _ => None,
            })
            .collect();

        let mut report = ReconcileReport {
            attempted: batch.len(),
            ..ReconcileReport::default()
        };
        if batch.is_empty() {
            return report;
        }

        let payload = batch.iter().map(|(k, v, _)| (k.clone(), v.clone())).collect();
        match upserter.upsert_batch(payload).await {
            Ok(()) => {
                report.cleared = batch
                    .iter()
                    .filter(|(k, _, since)| self.confirm(k, *since))
                    .count();
                self.last_sync_ms.store(unix_millis(), Ordering::Release);
                log::info!("Batch upsert confirmed {} pending entries", report.cleared);
            }
            Err(e) => {
                log::warn!("Batch upsert of {} entries failed: {e:#}", batch.len());
                report.error = Some(format!("{e:#}"));
            }
        }

        report.reloaded = self.reload_logged().await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory stand-in for the remote store.
    #[derive(Default)]
    struct Remote {
        rows: Mutex<HashMap<String, i64>>,
        fail_upserts: Mutex<bool>,
    }

    #[async_trait]
    impl Reloader<String, i64> for Remote {
        async fn reload(&self) -> anyhow::Result<HashMap<String, i64>> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    #[async_trait]
    impl BatchUpserter<String, i64> for Remote {
        async fn upsert_batch(&self, entries: Vec<(String, i64)>) -> anyhow::Result<()> {
            if *self.fail_upserts.lock().unwrap() {
                anyhow::bail!("remote unavailable");
            }
            self.rows.lock().unwrap().extend(entries);
            Ok(())
        }
    }

    async fn overlay_with(rows: &[(&str, i64)]) -> (Arc<Remote>, OptimisticOverlay<String, i64>) {
        let remote = Arc::new(Remote::default());
        remote
            .rows
            .lock()
            .unwrap()
            .extend(rows.iter().map(|(k, v)| (k.to_string(), *v)));
        let overlay = OptimisticOverlay::new(
            Arc::clone(&remote) as Arc<dyn Reloader<String, i64>>,
            Clock::new(1),
        );
        overlay.reload().await.unwrap();
        (remote, overlay)
    }

    #[tokio::test]
    async fn failed_optimistic_write_reverts_and_surfaces_error() {
        let (_remote, overlay) = overlay_with(&[("budget", 100)]).await;
        let key = "budget".to_string();

        let res: Result<(), String> = overlay
            .apply_optimistic(key.clone(), 250, |_| async {
                Err("server said no".to_string())
            })
            .await;

        assert_eq!(res.unwrap_err(), "server said no");
        assert_eq!(overlay.get(&key), Some(100));
        assert!(!overlay.entry(&key).unwrap().is_pending());
    }

    #[tokio::test]
    async fn pending_value_is_visible_during_the_remote_call() {
        let (remote, overlay) = overlay_with(&[("budget", 100)]).await;
        let key = "budget".to_string();

        let res: Result<(), String> = overlay
            .apply_optimistic(key.clone(), 250, |v| {
                assert_eq!(overlay.get(&key), Some(250));
                remote.rows.lock().unwrap().insert(key.clone(), v);
                async { Ok(()) }
            })
            .await;

        assert!(res.is_ok());
        let entry = overlay.entry(&key).unwrap();
        assert_eq!(entry.confirmed, Some(250));
        assert!(entry.pending.is_none());
    }

    #[tokio::test]
    async fn reload_wins_over_local_confirmation() {
        // remote accepted the call but normalised the value
        let (remote, overlay) = overlay_with(&[]).await;
        let key = "task".to_string();

        let _: Result<(), String> = overlay
            .apply_optimistic(key.clone(), 7, |_| {
                remote.rows.lock().unwrap().insert(key.clone(), 8);
                async { Ok(()) }
            })
            .await;

        assert_eq!(overlay.get(&key), Some(8));
    }

    #[tokio::test]
    async fn revert_of_new_entity_removes_it() {
        let (_remote, overlay) = overlay_with(&[]).await;
        let key = "fresh".to_string();
        let since = overlay.write_pending(key.clone(), 1);
        assert_eq!(overlay.get(&key), Some(1));

        assert!(overlay.revert(&key, since));
        assert!(overlay.entry(&key).is_none());
    }

    #[tokio::test]
    async fn revert_ignores_superseded_write() {
        let (_remote, overlay) = overlay_with(&[("k", 1)]).await;
        let key = "k".to_string();
        let first = overlay.write_pending(key.clone(), 2);
        overlay.write_pending(key.clone(), 3);

        assert!(!overlay.revert(&key, first));
        assert_eq!(overlay.get(&key), Some(3));
    }

    #[tokio::test]
    async fn batch_reconcile_success_clears_entries() {
        let (remote, overlay) = overlay_with(&[("a", 1)]).await;
        overlay.write_pending("a".to_string(), 10);
        overlay.write_pending("b".to_string(), 20);
        assert!(overlay.last_sync_time().is_none());

        let report = overlay.reconcile(remote.as_ref()).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.cleared, 2);
        assert!(report.error.is_none());
        assert!(report.reloaded);
        assert_eq!(overlay.pending_count(), 0);
        assert_eq!(overlay.get(&"b".to_string()), Some(20));
        assert!(overlay.last_sync_time().is_some());
    }

    #[tokio::test]
    async fn batch_reconcile_failure_keeps_entries() {
        let (remote, overlay) = overlay_with(&[("a", 1)]).await;
        *remote.fail_upserts.lock().unwrap() = true;
        overlay.write_pending("a".to_string(), 10);

        let report = overlay.reconcile(remote.as_ref()).await;
        assert_eq!(report.cleared, 0);
        assert!(report.error.unwrap().contains("remote unavailable"));
        assert!(report.reloaded);

        let entry = overlay.entry(&"a".to_string()).unwrap();
        assert_eq!(entry.confirmed, Some(1));
        assert_eq!(entry.pending, Some(10));
        assert!(overlay.last_sync_time().is_none());
    }

    #[tokio::test]
    async fn reconcile_with_nothing_pending_is_a_no_op() {
        let (remote, overlay) = overlay_with(&[("a", 1)]).await;
        let report = overlay.reconcile(remote.as_ref()).await;
        assert_eq!(report, ReconcileReport::default());
    }

    #[tokio::test]
    async fn reload_drops_entities_deleted_remotely() {
        let (remote, overlay) = overlay_with(&[("a", 1), ("b", 2)]).await;
        remote.rows.lock().unwrap().remove("a");
        overlay.write_pending("b".to_string(), 5);

        overlay.reload().await.unwrap();
        assert!(overlay.entry(&"a".to_string()).is_none());
        assert_eq!(overlay.values().len(), 1);
        assert_eq!(overlay.get(&"b".to_string()), Some(5));
    }
}
