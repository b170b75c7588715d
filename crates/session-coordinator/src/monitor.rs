//! Background reachability probing.
//!
//! A fixed-interval loop asks the backend for its current session and flips
//! [`ConnectionHealth`] between `Connected` and `Disconnected` on edges.
//! The probe never touches auth status and never reports `Reconnecting`;
//! that signal belongs to the manual retry path alone.
//!
//! [`ConnectionHealth`]: crate::state::ConnectionHealth

use crate::coordinator::CoordinatorInner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between reachability probes.
    pub probe_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
        }
    }
}

/// Spawn the probe loop. Returns the handle so teardown can await it;
/// once the shutdown signal is observed no further probe runs.
pub(crate) fn spawn(
    inner: Arc<CoordinatorInner>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(inner.config.monitor.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of an interval completes immediately; consume it
        // so probing starts one full period after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    // Meaningless before the first refresh resolves, and a
                    // refresh already doubles as a probe while it runs.
                    if !inner.is_initialized() || inner.refresh_in_flight() {
                        continue;
                    }
                    match inner.backend.get_session().await {
                        Ok(_) => inner.mark_probe_success(),
                        Err(e) => {
                            debug!(error = %e, "Connection probe failed");
                            inner.mark_probe_failure();
                        }
                    }
                }
            }
        }
        debug!("Connection monitor stopped");
    })
}
