use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

use crate::network::offline_queue::ActionQueue;
use crate::network::sync_status::SyncResult;
use crate::network::sync_worker::SyncProcessor;

/// Owns the process-wide online flag and kicks off a drain when it comes back.
///
/// No debouncing: every false to true transition with a non-empty queue
/// spawns one drain. Overlapping drains are serialised by the processor.
pub struct NetworkGate {
    state: watch::Sender<bool>,
    queue: Arc<ActionQueue>,
    processor: Arc<SyncProcessor>,
}

impl NetworkGate {
    pub fn new(
        state: watch::Sender<bool>,
        queue: Arc<ActionQueue>,
        processor: Arc<SyncProcessor>,
    ) -> Self {
        Self {
            state,
            queue,
            processor,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that observes every connectivity change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Record the latest connectivity signal.
    ///
    /// Returns the handle of the drain spawned by an offline to online
    /// transition, if any. The caller is never blocked on it.
    pub fn set_connectivity(&self, online: bool) -> Option<JoinHandle<SyncResult>> {
        let was_online = self.state.send_replace(online);
        if was_online == online {
            return None;
        }

        if !online {
            log::warn!(
                "Connectivity lost, {} actions will wait in the queue",
                self.queue.len()
            );
            return None;
        }

        let pending = self.queue.len();
        log::info!("Connectivity restored, {pending} queued actions pending");
        if pending == 0 {
            return None;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let processor = Arc::clone(&self.processor);
                Some(handle.spawn(async move { processor.drain().await }))
            }
            Err(_) => {
                log::warn!("No async runtime available, queued actions wait for a manual sync");
                None
            }
        }
    }
}

/// Source of the raw connectivity signal.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Considers the remote reachable when a TCP connection to `target` opens in time.
pub struct TcpProbe {
    target: String,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new<T: Into<String>>(target: T) -> Self {
        Self {
            target: target.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub async fn check_once(target: &str, connect_timeout: Duration) -> bool {
        matches!(
            timeout(connect_timeout, TcpStream::connect(target)).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn check(&self) -> bool {
        Self::check_once(&self.target, self.connect_timeout).await
    }
}

/// Polls a probe and feeds the result into a [`NetworkGate`].
pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    gate: Arc<NetworkGate>,
    interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, gate: Arc<NetworkGate>, interval: Duration) -> Self {
        Self {
            probe,
            gate,
            interval,
        }
    }

    /// Probe once and forward the result.
    pub async fn tick(&self) -> bool {
        let ok = self.probe.check().await;
        self.gate.set_connectivity(ok);
        ok
    }

    pub async fn run(self) {
        loop {
            self.tick().await;
            sleep(self.interval).await;
        }
    }
}
