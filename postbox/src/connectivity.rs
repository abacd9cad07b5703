//! Network reachability signal and the reconnect driver it feeds.
//!
//! The signal is tri-state: `None` (unknown), `Some(false)` (offline) and
//! `Some(true)` (online). Only a change to `Some(true)` drives the delivery
//! core: the driver reopens the transport and sweeps the pending outbox.
//! Detecting reachability is left to whoever publishes on the signal.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::delivery::{Coordinator, Notice, RetrySummary};
use crate::transport::Transport;

/// Publishing side of the connectivity signal.
#[derive(Debug)]
pub struct ConnectivitySignal {
    tx: watch::Sender<Option<bool>>,
}

impl ConnectivitySignal {
    /// A signal starting out unknown.
    #[must_use]
    pub fn new() -> Self {
        Self::with_initial(None)
    }

    #[must_use]
    pub fn with_initial(value: Option<bool>) -> Self {
        let (tx, _) = watch::channel(value);
        Self { tx }
    }

    /// Publish a new value. Returns `false` if it equals the current one, in
    /// which case subscribers are not woken.
    pub fn set(&self, value: Option<bool>) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    #[must_use]
    pub fn current(&self) -> Option<bool> {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<bool>> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Reopen the transport and sweep the outbox once.
///
/// A failed connect is reported as [`Notice::ConnectFailed`] and the sweep
/// still runs: bulk retry always tries the transport, so with the link down
/// every entry simply stays pending. Returns `None` if the sweep could not
/// list the outbox.
pub async fn reconcile<T: Transport>(coordinator: &Coordinator<T>) -> Option<RetrySummary> {
    if let Err(e) = coordinator.transport().connect().await {
        tracing::warn!(error = %e, "reconnect failed");
        coordinator.notify(Notice::ConnectFailed(e.to_string()));
    }

    match coordinator.retry_pending().await {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::warn!(error = %e, "retry sweep failed");
            coordinator.notify(Notice::SweepFailed(e.to_string()));
            None
        }
    }
}

/// Spawn the task that reacts to the connectivity signal.
///
/// The current value is acted on first, then every change. Each time the
/// signal reads `Some(true)` the task runs [`reconcile`]. The task ends when
/// every publisher of the signal has been dropped.
pub fn spawn_reconnect_driver<T>(
    coordinator: Arc<Coordinator<T>>,
    mut signal: watch::Receiver<Option<bool>>,
) -> JoinHandle<()>
where
    T: Transport + 'static,
{
    tokio::spawn(async move {
        loop {
            let value = *signal.borrow_and_update();
            tracing::debug!(?value, "connectivity changed");
            if value == Some(true) {
                reconcile(&coordinator).await;
            }
            if signal.changed().await.is_err() {
                tracing::debug!("connectivity signal closed, driver exiting");
                break;
            }
        }
    })
}
