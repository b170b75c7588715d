//! Bridge from the backend's push-event stream to coordinator actions.
//!
//! Events are advisory: the bridge reacts by asking the coordinator to
//! reconcile (or clear) rather than trusting event payloads directly, so a
//! dropped or duplicated event can never corrupt state.

use crate::coordinator::CoordinatorInner;
use identity_client::{AuthChange, AuthEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn the event loop. Stops on shutdown or when the backend drops its
/// event channel; safe to signal shutdown more than once.
pub(crate) fn spawn(
    inner: Arc<CoordinatorInner>,
    mut events: broadcast::Receiver<AuthChange>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = events.recv() => match received {
                    Ok(change) => apply(&inner, change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Auth event stream lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Auth event bridge stopped");
    })
}

async fn apply(inner: &Arc<CoordinatorInner>, change: AuthChange) {
    debug!(event = change.event.as_str(), "Auth event received");
    match &change.event {
        AuthEvent::SignedIn | AuthEvent::UserUpdated => {
            if let Err(e) = inner.refresh().await {
                warn!(
                    event = change.event.as_str(),
                    error = %e,
                    "Event-driven refresh failed"
                );
            }
        }
        AuthEvent::SignedOut => {
            inner.clear_local_session("backend reported sign-out");
        }
        AuthEvent::TokenRefreshed => {
            // The session is still the same identity; just note the sync.
            inner.touch_last_sync();
        }
        AuthEvent::PasswordRecovery => {
            info!("Password recovery event observed");
        }
        AuthEvent::Unknown(name) => {
            debug!(event = %name, "Ignoring unrecognized auth event");
        }
    }
}
