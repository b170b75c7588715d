//! HTTP implementations of the collaborator contracts.
//!
//! [`HttpIdentityBackend`] talks to a Supabase-style auth surface
//! (`/auth/v1/token`, `/auth/v1/signup`, `/auth/v1/logout`, `/auth/v1/user`)
//! and keeps the issued session in memory. [`HttpProfileStore`] reads and
//! writes `profiles` rows through the PostgREST surface (`/rest/v1/profiles`).

use crate::error::{IdentityError, IdentityResult};
use crate::types::{AuthChange, AuthEvent, Profile, ProfilePatch, ProfileSeed, Session, User};
use crate::{IdentityBackend, ProfileStore};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use url::Url;

/// Capacity of the push-event channel. Events are low frequency; a small
/// buffer is enough to ride out a slow subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Connection settings for the identity backend and profile store.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Project API URL, e.g. `https://xyz.supabase.co`
    pub base_url: String,
    /// Publishable (anonymous) API key
    pub anon_key: String,
}

impl IdentityConfig {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
    ) -> IdentityResult<Self> {
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(IdentityError::Config(format!(
                "unsupported scheme in base URL: {}",
                parsed.scheme()
            )));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        })
    }

    /// Read connection settings from `IDENTITY_API_URL` / `IDENTITY_ANON_KEY`.
    pub fn from_env() -> IdentityResult<Self> {
        let base_url = std::env::var("IDENTITY_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| IdentityError::Config("IDENTITY_API_URL is not set".to_string()))?;
        let anon_key = std::env::var("IDENTITY_ANON_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| IdentityError::Config("IDENTITY_ANON_KEY is not set".to_string()))?;
        Self::new(base_url, anon_key)
    }
}

/// Token grant response from the auth surface.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    user: User,
}

/// Identity backend over HTTP.
///
/// Holds the issued session in memory and broadcasts [`AuthChange`] events
/// for sign-in and sign-out so in-process subscribers observe the same
/// stream a push channel would deliver.
pub struct HttpIdentityBackend {
    http_client: reqwest::Client,
    config: IdentityConfig,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
}

impl HttpIdentityBackend {
    pub fn new(config: IdentityConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            http_client: reqwest::Client::new(),
            config,
            session: RwLock::new(None),
            events,
        }
    }

    /// Build an auth endpoint URL.
    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.base_url, path)
    }

    /// Access token of the current session, if any.
    pub async fn current_access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    fn emit(&self, event: AuthEvent, session: Option<Session>) {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.events.send(AuthChange { event, session });
    }

    async fn store_grant(&self, grant: &TokenResponse) -> Session {
        let session = Session {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            expires_at: Some(Utc::now() + Duration::seconds(grant.expires_in)),
        };
        *self.session.write().await = Some(session.clone());
        session
    }
}

#[async_trait]
impl IdentityBackend for HttpIdentityBackend {
    async fn get_session(&self) -> IdentityResult<Option<Session>> {
        Ok(self.session.read().await.clone())
    }

    async fn get_user(&self) -> IdentityResult<Option<User>> {
        let Some(access_token) = self.current_access_token().await else {
            return Ok(None);
        };

        let url = self.auth_url("user");
        debug!(url = %url, "Fetching current user");

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "User lookup failed");
            return Err(IdentityError::Backend(format!(
                "User lookup rejected: HTTP {}: {}",
                status, body
            )));
        }

        let user: User = response.json().await?;
        Ok(Some(user))
    }

    async fn sign_in(&self, email: &str, password: &str) -> IdentityResult<User> {
        let url = self.auth_url("token?grant_type=password");
        debug!(url = %url, email = %email, "Attempting email/password sign-in");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Sign-in failed");
            return Err(if status.is_client_error() {
                IdentityError::InvalidCredentials(format!("HTTP {}: {}", status, body))
            } else {
                IdentityError::Backend(format!("HTTP {}: {}", status, body))
            });
        }

        let grant: TokenResponse = response.json().await?;
        let session = self.store_grant(&grant).await;
        self.emit(AuthEvent::SignedIn, Some(session));

        info!(user_id = %grant.user.id, "Sign-in successful");
        Ok(grant.user)
    }

    async fn sign_out(&self) -> IdentityResult<()> {
        let access_token = self.current_access_token().await;

        // Local invalidation happens regardless of the remote outcome.
        *self.session.write().await = None;
        self.emit(AuthEvent::SignedOut, None);

        let Some(access_token) = access_token else {
            return Ok(());
        };

        let url = self.auth_url("logout");
        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Remote sign-out failed");
            return Err(IdentityError::Backend(format!(
                "Sign-out rejected: HTTP {}: {}",
                status, body
            )));
        }

        info!("Signed out");
        Ok(())
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<serde_json::Value>,
    ) -> IdentityResult<User> {
        let url = self.auth_url("signup");
        debug!(url = %url, email = %email, "Attempting signup");

        let mut body = serde_json::json!({
            "email": email,
            "password": password,
        });
        if let Some(metadata) = metadata {
            body["data"] = metadata;
        }

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Signup failed");
            return Err(IdentityError::Backend(format!(
                "Signup rejected: HTTP {}: {}",
                status, body
            )));
        }

        let grant: TokenResponse = response.json().await?;
        let session = self.store_grant(&grant).await;
        self.emit(AuthEvent::SignedIn, Some(session));

        info!(user_id = %grant.user.id, "Signup successful");
        Ok(grant.user)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

/// Profile store over the PostgREST surface.
///
/// Bearer tokens come from the paired [`HttpIdentityBackend`]; profile rows
/// are only reachable for an authenticated user.
pub struct HttpProfileStore {
    http_client: reqwest::Client,
    config: IdentityConfig,
    auth: Arc<HttpIdentityBackend>,
}

impl HttpProfileStore {
    pub fn new(config: IdentityConfig, auth: Arc<HttpIdentityBackend>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            config,
            auth,
        }
    }

    /// Build the REST API URL for a table.
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    async fn bearer(&self) -> IdentityResult<String> {
        self.auth
            .current_access_token()
            .await
            .ok_or_else(|| IdentityError::Profile("no active session".to_string()))
    }

    async fn fetch_existing(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> IdentityResult<Option<Profile>> {
        let url = format!(
            "{}?user_id=eq.{}&limit=1",
            self.rest_url("profiles"),
            user_id
        );

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Profile(format!(
                "Profile fetch failed: HTTP {}: {}",
                status, body
            )));
        }

        let rows: Vec<Profile> = response.json().await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ProfileStore for HttpProfileStore {
    async fn get_or_create(
        &self,
        user_id: &str,
        seed: ProfileSeed,
    ) -> IdentityResult<Option<Profile>> {
        let access_token = self.bearer().await?;

        if let Some(profile) = self.fetch_existing(user_id, &access_token).await? {
            return Ok(Some(profile));
        }

        debug!(user_id = %user_id, "No profile row, creating one");

        let url = self.rest_url("profiles");
        let mut body = serde_json::json!({ "user_id": user_id });
        if let Some(display_name) = &seed.display_name {
            body["display_name"] = serde_json::json!(display_name);
        }

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Profile(format!(
                "Profile create failed: HTTP {}: {}",
                status, body
            )));
        }

        let rows: Vec<Profile> = response.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn update(&self, user_id: &str, patch: ProfilePatch) -> IdentityResult<Profile> {
        let access_token = self.bearer().await?;

        let url = format!("{}?user_id=eq.{}", self.rest_url("profiles"), user_id);

        let response = self
            .http_client
            .patch(&url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Profile(format!(
                "Profile update failed: HTTP {}: {}",
                status, body
            )));
        }

        let rows: Vec<Profile> = response.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| IdentityError::Profile(format!("no profile row for user {}", user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> IdentityConfig {
        IdentityConfig::new("https://test.example.co", "test-key").unwrap()
    }

    #[test]
    fn config_trims_trailing_slash() {
        let config = IdentityConfig::new("https://test.example.co/", "key").unwrap();
        assert_eq!(config.base_url, "https://test.example.co");
    }

    #[test]
    fn config_rejects_unparseable_base_url() {
        let err = IdentityConfig::new("not a url", "key").unwrap_err();
        assert!(matches!(err, IdentityError::InvalidUrl(_)));
    }

    #[test]
    fn config_rejects_non_http_scheme() {
        let err = IdentityConfig::new("ftp://test.example.co", "key").unwrap_err();
        assert!(matches!(err, IdentityError::Config(_)));
    }

    #[test]
    fn auth_url_shape() {
        let backend = HttpIdentityBackend::new(test_config());
        assert_eq!(
            backend.auth_url("token?grant_type=password"),
            "https://test.example.co/auth/v1/token?grant_type=password"
        );
        assert_eq!(backend.auth_url("user"), "https://test.example.co/auth/v1/user");
    }

    #[test]
    fn rest_url_shape() {
        let auth = Arc::new(HttpIdentityBackend::new(test_config()));
        let store = HttpProfileStore::new(test_config(), auth);
        assert_eq!(
            store.rest_url("profiles"),
            "https://test.example.co/rest/v1/profiles"
        );
    }

    #[tokio::test]
    async fn get_session_is_local_and_initially_empty() {
        let backend = HttpIdentityBackend::new(test_config());
        let session = backend.get_session().await.unwrap();
        assert!(session.is_none());
    }

    #[tokio::test]
    async fn get_user_without_session_returns_none() {
        let backend = HttpIdentityBackend::new(test_config());
        let user = backend.get_user().await.unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn sign_out_without_session_emits_signed_out() {
        let backend = HttpIdentityBackend::new(test_config());
        let mut events = backend.subscribe();

        backend.sign_out().await.unwrap();

        let change = events.try_recv().unwrap();
        assert_eq!(change.event, AuthEvent::SignedOut);
        assert!(change.session.is_none());
    }

    #[tokio::test]
    async fn profile_store_requires_session() {
        let auth = Arc::new(HttpIdentityBackend::new(test_config()));
        let store = HttpProfileStore::new(test_config(), auth);

        let err = store
            .get_or_create("user-1", ProfileSeed::default())
            .await
            .expect_err("expected missing session error");
        assert!(matches!(err, IdentityError::Profile(_)));
    }

    #[test]
    fn token_response_parses_minimal_grant() {
        let grant: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "abc",
                "expires_in": 3600,
                "user": { "id": "user-1", "email": "a@b.com" }
            }"#,
        )
        .unwrap();
        assert_eq!(grant.access_token, "abc");
        assert!(grant.refresh_token.is_none());
        assert_eq!(grant.user.email.as_deref(), Some("a@b.com"));
    }
}
