//! The session coordinator state machine.
//!
//! One coordinator instance owns the live [`SessionState`] and is the only
//! writer to it. All mutations go through a single `watch` channel so
//! readers always observe complete snapshots. A compare-and-swap guard
//! keeps at most one refresh in flight; extra refresh requests are dropped,
//! not queued, which bounds work under event storms.

use crate::bridge;
use crate::error::{SessionError, SessionResult};
use crate::monitor::{self, MonitorConfig};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::state::{ConnectionHealth, ErrorInfo, SessionState, SessionStatus};
use chrono::Utc;
use identity_client::{IdentityBackend, Profile, ProfilePatch, ProfileSeed, ProfileStore, User};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for refresh, retry, and probing behavior.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Hard bound on a whole refresh, including retries.
    pub refresh_timeout: Duration,
    /// Consecutive whole-refresh failures tolerated before the local
    /// session is cleared.
    pub max_refresh_failures: u32,
    /// Per-call retry behavior for the session and user fetches.
    pub retry: RetryConfig,
    /// Background reachability probing.
    pub monitor: MonitorConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(10),
            max_refresh_failures: 3,
            retry: RetryConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// Clears the in-flight flag on drop, so a cancelled refresh future can
/// never wedge the guard shut.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What a completed refresh found.
enum RefreshOutcome {
    /// The backend reports no session. Not an error.
    SignedOut,
    /// Session and user resolved; profile may be missing (partial auth).
    Authenticated {
        user: User,
        profile: Option<Profile>,
    },
}

/// Shared coordinator internals. The background tasks (connection monitor,
/// event bridge) and the facade all hold this behind an `Arc`.
pub(crate) struct CoordinatorInner {
    pub(crate) backend: Arc<dyn IdentityBackend>,
    pub(crate) profiles: Arc<dyn ProfileStore>,
    pub(crate) config: CoordinatorConfig,
    /// Single writer channel for the live snapshot.
    state_tx: watch::Sender<SessionState>,
    /// At-most-one-refresh-in-flight guard.
    in_flight: AtomicBool,
    /// Consecutive whole-refresh failures. Distinct from the per-call
    /// attempt counter inside [`RetryPolicy`].
    failure_count: AtomicU32,
    /// Bumped on every local session clear. A refresh only commits if the
    /// generation it started under is still current, so a fetch that was
    /// in flight when the user signed out cannot resurrect the identity.
    generation: AtomicU64,
}

impl CoordinatorInner {
    pub(crate) fn snapshot(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.state_tx.borrow().initialized
    }

    pub(crate) fn refresh_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn mutate(&self, modify: impl FnOnce(&mut SessionState)) {
        self.state_tx.send_modify(modify);
    }

    /// Commit a refresh result only if no local clear happened since
    /// `generation` was read. The check runs under the channel lock, the
    /// same lock a clear takes to bump the generation.
    fn commit_if_current(&self, generation: u64, apply: impl FnOnce(&mut SessionState)) -> bool {
        let committed = self.state_tx.send_if_modified(|s| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            apply(s);
            true
        });
        if !committed {
            debug!("Local session changed during refresh, discarding its result");
        }
        committed
    }

    /// Reconcile local state against the backend.
    ///
    /// If a refresh is already running this returns immediately without
    /// doing anything; the in-flight refresh subsumes the request.
    pub(crate) async fn refresh(&self) -> SessionResult<()> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Refresh already in flight, skipping");
            return Ok(());
        }

        let _guard = InFlightGuard(&self.in_flight);
        self.run_refresh().await
    }

    /// One full refresh cycle. Caller must hold the in-flight guard.
    ///
    /// The fetch work races a hard timeout; a timed-out fetch is dropped
    /// before it can commit anything, so a later refresh's result wins.
    /// State is committed exactly once, at the end.
    async fn run_refresh(&self) -> SessionResult<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.mutate(|s| {
            s.status = SessionStatus::Authenticating;
            s.error = None;
        });

        let outcome =
            match tokio::time::timeout(self.config.refresh_timeout, self.fetch_outcome()).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout),
            };

        match outcome {
            Ok(RefreshOutcome::SignedOut) => {
                self.failure_count.store(0, Ordering::SeqCst);
                debug!("Refresh found no session");
                self.commit_if_current(generation, |s| {
                    s.status = SessionStatus::Unauthenticated;
                    s.user = None;
                    s.profile = None;
                    s.error = None;
                    s.connection = ConnectionHealth::Connected;
                    s.initialized = true;
                });
                Ok(())
            }
            Ok(RefreshOutcome::Authenticated { user, profile }) => {
                self.failure_count.store(0, Ordering::SeqCst);
                info!(
                    user_id = %user.id,
                    partial = profile.is_none(),
                    "Session refreshed"
                );
                self.commit_if_current(generation, |s| {
                    s.status = SessionStatus::Authenticated;
                    s.user = Some(user);
                    s.profile = profile;
                    s.error = None;
                    s.connection = ConnectionHealth::Connected;
                    s.last_sync_at = Some(Utc::now());
                    s.initialized = true;
                });
                Ok(())
            }
            Err(err) => {
                if self.generation.load(Ordering::SeqCst) != generation {
                    // The session was cleared while this refresh ran;
                    // its failure no longer means anything.
                    debug!("Local session changed during refresh, discarding its result");
                    return Ok(());
                }

                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(failures = failures, error = %err, "Session refresh failed");

                if failures >= self.config.max_refresh_failures {
                    // Repeated failure: stop pretending the cached identity
                    // is still valid.
                    let terminal = SessionError::MaxRetriesExceeded(failures);
                    let error = ErrorInfo::from(&terminal);
                    self.commit_if_current(generation, |s| {
                        s.status = SessionStatus::Unauthenticated;
                        s.user = None;
                        s.profile = None;
                        s.error = Some(error);
                        s.connection = ConnectionHealth::Disconnected;
                        s.initialized = true;
                    });
                    Err(terminal)
                } else {
                    // Grace period: keep the previous user/profile so a
                    // transient blip does not visibly log the user out.
                    let error = ErrorInfo::from(&err);
                    self.commit_if_current(generation, |s| {
                        s.status = SessionStatus::AuthError;
                        s.error = Some(error);
                        s.connection = ConnectionHealth::Disconnected;
                        s.initialized = true;
                    });
                    Err(err)
                }
            }
        }
    }

    async fn fetch_outcome(&self) -> SessionResult<RefreshOutcome> {
        let retry = RetryPolicy::new(self.config.retry.clone());

        // Step A: current session, retried.
        let session = retry
            .execute(|| self.backend.get_session())
            .await
            .map_err(SessionError::from)?;
        if session.is_none() {
            return Ok(RefreshOutcome::SignedOut);
        }

        // Step B: user record, retried with its own attempt budget.
        let user = retry
            .execute(|| self.backend.get_user())
            .await
            .map_err(SessionError::from)?
            .ok_or_else(|| {
                SessionError::Backend("session exists but user lookup came back empty".to_string())
            })?;

        // Step C: profile, once, never fatal for the session.
        let profile = match self
            .profiles
            .get_or_create(&user.id, ProfileSeed::from(&user))
            .await
        {
            Ok(profile) => profile,
            Err(e) => {
                warn!(
                    user_id = %user.id,
                    error = %e,
                    "Profile fetch failed, continuing with partial auth"
                );
                None
            }
        };

        Ok(RefreshOutcome::Authenticated { user, profile })
    }

    /// Drop all locally held auth state without a backend round trip.
    /// Invalidates any refresh currently in flight.
    pub(crate) fn clear_local_session(&self, reason: &str) {
        self.failure_count.store(0, Ordering::SeqCst);
        info!(reason = reason, "Local session cleared");
        self.mutate(|s| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            s.status = SessionStatus::Unauthenticated;
            s.user = None;
            s.profile = None;
            s.error = None;
        });
    }

    pub(crate) fn touch_last_sync(&self) {
        self.mutate(|s| s.last_sync_at = Some(Utc::now()));
    }

    pub(crate) async fn login(&self, email: &str, secret: &str) -> SessionResult<User> {
        match self.backend.sign_in(email, secret).await {
            Ok(user) => {
                info!(user_id = %user.id, "Login succeeded, refreshing session state");
                self.refresh().await?;
                Ok(user)
            }
            Err(e) => {
                let err = SessionError::from(e);
                warn!(error = %err, "Login failed");
                let error = ErrorInfo::from(&err);
                self.mutate(|s| {
                    s.status = SessionStatus::AuthError;
                    s.error = Some(error);
                });
                Err(err)
            }
        }
    }

    /// Sign out. Local state is cleared before the backend call resolves:
    /// a slow or failing remote sign-out must not leave the app looking
    /// authenticated.
    pub(crate) async fn logout(&self) -> SessionResult<()> {
        self.clear_local_session("user logout");

        if let Err(e) = self.backend.sign_out().await {
            warn!(error = %e, "Backend sign-out failed after local clear");
            return Err(SessionError::from(e));
        }
        Ok(())
    }

    pub(crate) async fn signup(
        &self,
        email: &str,
        secret: &str,
        metadata: Option<serde_json::Value>,
    ) -> SessionResult<User> {
        match self.backend.sign_up(email, secret, metadata).await {
            Ok(user) => {
                info!(user_id = %user.id, "Signup succeeded, refreshing session state");
                self.refresh().await?;
                Ok(user)
            }
            Err(e) => {
                let err = SessionError::from(e);
                warn!(error = %err, "Signup failed");
                let error = ErrorInfo::from(&err);
                self.mutate(|s| {
                    s.status = SessionStatus::AuthError;
                    s.error = Some(error);
                });
                Err(err)
            }
        }
    }

    /// Apply a profile patch, then refresh to reconcile. A profile-store
    /// failure is surfaced to the caller and recorded, but never touches
    /// the session status.
    pub(crate) async fn update_profile(
        &self,
        user_id: &str,
        patch: ProfilePatch,
    ) -> SessionResult<Profile> {
        match self.profiles.update(user_id, patch).await {
            Ok(profile) => {
                self.refresh().await?;
                Ok(profile)
            }
            Err(e) => {
                let err = SessionError::Profile(e);
                warn!(user_id = %user_id, error = %err, "Profile update failed");
                let error = ErrorInfo::from(&err);
                self.mutate(|s| s.error = Some(error));
                Err(err)
            }
        }
    }

    /// Manual recovery entry point. The only path that ever sets
    /// [`ConnectionHealth::Reconnecting`].
    pub(crate) async fn retry(&self) -> SessionResult<()> {
        info!("Manual retry requested");
        self.failure_count.store(0, Ordering::SeqCst);
        self.mutate(|s| {
            s.connection = ConnectionHealth::Reconnecting;
            s.error = None;
        });
        self.refresh().await
    }

    pub(crate) fn clear_error(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.mutate(|s| s.error = None);
    }

    /// Connected edge from the background probe.
    pub(crate) fn mark_probe_success(&self) {
        let connected = self.state_tx.borrow().connection == ConnectionHealth::Connected;
        if !connected {
            info!("Backend reachable again");
            self.mutate(|s| s.connection = ConnectionHealth::Connected);
        }
    }

    /// Disconnected edge from the background probe. Never touches auth
    /// status; only a refresh decides that.
    pub(crate) fn mark_probe_failure(&self) {
        let connected = self.state_tx.borrow().connection == ConnectionHealth::Connected;
        if connected {
            warn!("Backend probe failed, marking disconnected");
            self.mutate(|s| s.connection = ConnectionHealth::Disconnected);
        }
    }
}

/// Owner of the session state machine and its background tasks.
///
/// Constructing a coordinator spawns the connection monitor and the auth
/// event bridge; [`SessionCoordinator::shutdown`] stops both
/// deterministically. Consumers interact through [`SessionFacade`]
/// obtained from [`SessionCoordinator::facade`].
///
/// [`SessionFacade`]: crate::SessionFacade
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionCoordinator {
    /// Create a coordinator with default configuration.
    pub fn new(backend: Arc<dyn IdentityBackend>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self::with_config(backend, profiles, CoordinatorConfig::default())
    }

    /// Create a coordinator with custom configuration.
    ///
    /// Must be called from within a tokio runtime; the monitor and event
    /// bridge are spawned here.
    pub fn with_config(
        backend: Arc<dyn IdentityBackend>,
        profiles: Arc<dyn ProfileStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::empty());
        let inner = Arc::new(CoordinatorInner {
            backend: backend.clone(),
            profiles,
            config,
            state_tx,
            in_flight: AtomicBool::new(false),
            failure_count: AtomicU32::new(0),
            generation: AtomicU64::new(0),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let events = backend.subscribe();
        let tasks = vec![
            monitor::spawn(inner.clone(), shutdown_rx.clone()),
            bridge::spawn(inner.clone(), events, shutdown_rx),
        ];

        Self {
            inner,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        }
    }

    /// Consumer-facing handle: snapshot access plus the command surface.
    pub fn facade(&self) -> crate::SessionFacade {
        crate::SessionFacade::new(self.inner.clone())
    }

    /// Value copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.inner.snapshot()
    }

    /// Watch receiver that observes every committed state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.subscribe()
    }

    /// Stop the connection monitor and event bridge.
    ///
    /// Idempotent. When this returns, no further probe or event callback
    /// will run.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().expect("lock poisoned").drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
