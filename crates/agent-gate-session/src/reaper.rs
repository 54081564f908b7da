//! Periodic eviction of expired sessions.

use std::{sync::Weak, time::Duration};

use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::SessionManager;

/// Background task sweeping a manager's expired sessions.
///
/// Holds only a weak reference, so the task ends on its own once the
/// manager is dropped.
#[derive(Debug)]
pub struct Reaper {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Spawn a reaper that sweeps every `period`.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub(crate) fn spawn(manager: Weak<SessionManager>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        // Synchronous: a sweep that has started always completes.
                        let evicted = manager.cleanup_expired_sessions();
                        if evicted > 0 {
                            debug!(evicted, "Reaper swept expired sessions");
                        }
                    }
                }
            }
            debug!("Reaper stopped");
        });

        debug!(period_ms = period.as_millis(), "Reaper started");
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Whether the task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal shutdown and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            warn!(error = %e, "Reaper task ended abnormally");
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
