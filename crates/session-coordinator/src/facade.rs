//! Consumer-facing handle over the coordinator.

use crate::coordinator::CoordinatorInner;
use crate::error::SessionResult;
use crate::state::SessionState;
use identity_client::{Profile, ProfilePatch, User};
use std::sync::Arc;
use tokio::sync::watch;

/// Cheap, cloneable handle for reading session state and issuing commands.
///
/// Every read is a value copy of a complete committed state; holders never
/// observe a half-applied mutation and cannot mutate coordinator state
/// through a snapshot.
#[derive(Clone)]
pub struct SessionFacade {
    inner: Arc<CoordinatorInner>,
}

impl SessionFacade {
    pub(crate) fn new(inner: Arc<CoordinatorInner>) -> Self {
        Self { inner }
    }

    /// Value copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.inner.snapshot()
    }

    /// Watch receiver notified on every committed state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.subscribe()
    }

    /// Reconcile local state against the backend. Returns `Ok(())` without
    /// doing anything when a refresh is already in flight.
    pub async fn refresh(&self) -> SessionResult<()> {
        self.inner.refresh().await
    }

    /// Authenticate with an email and password, then refresh.
    pub async fn login(&self, email: &str, password: &str) -> SessionResult<User> {
        self.inner.login(email, password).await
    }

    /// Sign out. Local state clears immediately; the backend call may
    /// still fail, which is reported but leaves the local sign-out intact.
    pub async fn logout(&self) -> SessionResult<()> {
        self.inner.logout().await
    }

    /// Register a new account, then refresh.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        metadata: Option<serde_json::Value>,
    ) -> SessionResult<User> {
        self.inner.signup(email, password, metadata).await
    }

    /// Apply a partial profile update, then refresh.
    pub async fn update_profile(
        &self,
        user_id: &str,
        patch: ProfilePatch,
    ) -> SessionResult<Profile> {
        self.inner.update_profile(user_id, patch).await
    }

    /// Manual recovery from an error or disconnected state.
    pub async fn retry(&self) -> SessionResult<()> {
        self.inner.retry().await
    }

    /// Dismiss the recorded error without changing anything else.
    pub fn clear_error(&self) {
        self.inner.clear_error()
    }
}
