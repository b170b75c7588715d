//! In-memory fakes shared by the coordinator, monitor, and bridge tests.

use crate::coordinator::CoordinatorConfig;
use crate::monitor::MonitorConfig;
use crate::retry::RetryConfig;
use async_trait::async_trait;
use identity_client::{
    AuthChange, AuthEvent, IdentityBackend, IdentityError, IdentityResult, Profile, ProfilePatch,
    ProfileSeed, ProfileStore, Session, User,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

/// Coordinator config with short timeouts and backoffs so failure paths
/// complete in milliseconds. The probe interval is effectively disabled;
/// monitor tests override it.
pub(crate) fn fast_config() -> CoordinatorConfig {
    // Opt-in log output for debugging test runs: RUST_LOG=debug cargo test.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    CoordinatorConfig {
        refresh_timeout: Duration::from_millis(250),
        max_refresh_failures: 3,
        retry: RetryConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
        },
        monitor: MonitorConfig {
            probe_interval: Duration::from_secs(3600),
        },
    }
}

/// Poll `predicate` until it holds or two seconds pass.
pub(crate) async fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !predicate() {
        assert!(
            Instant::now() < deadline,
            "condition not reached within two seconds"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

pub(crate) fn test_user(id: &str, email: &str) -> User {
    User {
        id: id.to_string(),
        email: Some(email.to_string()),
        created_at: None,
        updated_at: None,
    }
}

fn test_session() -> Session {
    Session {
        access_token: "access-token".to_string(),
        refresh_token: Some("refresh-token".to_string()),
        expires_at: None,
    }
}

/// Scriptable identity backend.
///
/// Failure injection counts individual calls; `u32::MAX` means fail every
/// call until cleared.
pub(crate) struct FakeBackend {
    session: Mutex<Option<Session>>,
    user: Mutex<Option<User>>,
    session_failures: AtomicU32,
    user_failures: AtomicU32,
    session_call_count: AtomicU32,
    user_call_count: AtomicU32,
    sign_out_call_count: AtomicU32,
    reject_credentials: AtomicBool,
    sign_out_fails: AtomicBool,
    delay: Mutex<Duration>,
    sign_out_delay: Mutex<Duration>,
    events: broadcast::Sender<AuthChange>,
}

impl FakeBackend {
    pub(crate) fn signed_out() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            session: Mutex::new(None),
            user: Mutex::new(None),
            session_failures: AtomicU32::new(0),
            user_failures: AtomicU32::new(0),
            session_call_count: AtomicU32::new(0),
            user_call_count: AtomicU32::new(0),
            sign_out_call_count: AtomicU32::new(0),
            reject_credentials: AtomicBool::new(false),
            sign_out_fails: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            sign_out_delay: Mutex::new(Duration::ZERO),
            events,
        }
    }

    pub(crate) fn signed_in(id: &str, email: &str) -> Self {
        let backend = Self::signed_out();
        *backend.session.lock().unwrap() = Some(test_session());
        *backend.user.lock().unwrap() = Some(test_user(id, email));
        backend
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_sign_out_delay(&self, delay: Duration) {
        *self.sign_out_delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_sessions(&self, count: u32) {
        self.session_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_sessions_forever(&self) {
        self.session_failures.store(u32::MAX, Ordering::SeqCst);
    }

    pub(crate) fn clear_session_failures(&self) {
        self.session_failures.store(0, Ordering::SeqCst);
    }

    pub(crate) fn fail_users(&self, count: u32) {
        self.user_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn reject_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    pub(crate) fn fail_sign_out(&self, fail: bool) {
        self.sign_out_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn session_calls(&self) -> u32 {
        self.session_call_count.load(Ordering::SeqCst)
    }

    pub(crate) fn user_calls(&self) -> u32 {
        self.user_call_count.load(Ordering::SeqCst)
    }

    pub(crate) fn sign_out_calls(&self) -> u32 {
        self.sign_out_call_count.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: AuthEvent) {
        let session = self.session.lock().unwrap().clone();
        let _ = self.events.send(AuthChange { event, session });
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining == 0 {
            return false;
        }
        if remaining != u32::MAX {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
        true
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

#[async_trait]
impl IdentityBackend for FakeBackend {
    async fn get_session(&self) -> IdentityResult<Option<Session>> {
        self.session_call_count.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if Self::take_failure(&self.session_failures) {
            return Err(IdentityError::NetworkUnavailable);
        }
        Ok(self.session.lock().unwrap().clone())
    }

    async fn get_user(&self) -> IdentityResult<Option<User>> {
        self.user_call_count.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if Self::take_failure(&self.user_failures) {
            return Err(IdentityError::NetworkUnavailable);
        }
        Ok(self.user.lock().unwrap().clone())
    }

    async fn sign_in(&self, email: &str, _password: &str) -> IdentityResult<User> {
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(IdentityError::InvalidCredentials(
                "invalid login credentials".to_string(),
            ));
        }
        let user = test_user("user-1", email);
        *self.user.lock().unwrap() = Some(user.clone());
        *self.session.lock().unwrap() = Some(test_session());
        Ok(user)
    }

    async fn sign_out(&self) -> IdentityResult<()> {
        self.sign_out_call_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.sign_out_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if self.sign_out_fails.load(Ordering::SeqCst) {
            return Err(IdentityError::Backend("sign-out rejected".to_string()));
        }
        *self.session.lock().unwrap() = None;
        *self.user.lock().unwrap() = None;
        Ok(())
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        _metadata: Option<serde_json::Value>,
    ) -> IdentityResult<User> {
        let user = test_user("user-1", email);
        *self.user.lock().unwrap() = Some(user.clone());
        *self.session.lock().unwrap() = Some(test_session());
        Ok(user)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

/// In-memory profile store with failure switches per operation.
pub(crate) struct FakeProfiles {
    profile: Mutex<Option<Profile>>,
    get_fails: AtomicBool,
    update_fails: AtomicBool,
    get_call_count: AtomicU32,
}

impl FakeProfiles {
    pub(crate) fn new() -> Self {
        Self {
            profile: Mutex::new(None),
            get_fails: AtomicBool::new(false),
            update_fails: AtomicBool::new(false),
            get_call_count: AtomicU32::new(0),
        }
    }

    pub(crate) fn fail_get(&self, fail: bool) {
        self.get_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_update(&self, fail: bool) {
        self.update_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn get_calls(&self) -> u32 {
        self.get_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for FakeProfiles {
    async fn get_or_create(
        &self,
        user_id: &str,
        seed: ProfileSeed,
    ) -> IdentityResult<Option<Profile>> {
        self.get_call_count.fetch_add(1, Ordering::SeqCst);
        if self.get_fails.load(Ordering::SeqCst) {
            return Err(IdentityError::Profile(
                "profiles table unavailable".to_string(),
            ));
        }
        let mut slot = self.profile.lock().unwrap();
        if slot.is_none() {
            *slot = Some(Profile {
                user_id: user_id.to_string(),
                display_name: seed.display_name,
                onboarded: false,
                created_at: None,
                updated_at: None,
            });
        }
        Ok(slot.clone())
    }

    async fn update(&self, user_id: &str, patch: ProfilePatch) -> IdentityResult<Profile> {
        if self.update_fails.load(Ordering::SeqCst) {
            return Err(IdentityError::Profile(
                "profile update rejected".to_string(),
            ));
        }
        let mut slot = self.profile.lock().unwrap();
        let profile = slot.get_or_insert_with(|| Profile {
            user_id: user_id.to_string(),
            display_name: None,
            onboarded: false,
            created_at: None,
            updated_at: None,
        });
        if let Some(display_name) = patch.display_name {
            profile.display_name = Some(display_name);
        }
        if let Some(onboarded) = patch.onboarded {
            profile.onboarded = onboarded;
        }
        Ok(profile.clone())
    }
}
