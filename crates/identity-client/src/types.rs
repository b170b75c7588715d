//! Wire types shared between the identity backend and its consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User record owned by the identity backend.
///
/// Consumers hold a read-only cached copy; the backend is the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User UUID
    pub id: String,
    /// Email the user signed up with (may be absent for social providers)
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Backend-issued proof that a user is currently signed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Application-level profile record keyed by [`User::id`].
///
/// A profile may be missing without invalidating the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Owning user's UUID
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub onboarded: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Initial values used when a profile row has to be created on first fetch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileSeed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl From<&User> for ProfileSeed {
    fn from(user: &User) -> Self {
        // Default the display name to the local part of the signup email.
        let display_name = user
            .email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string());
        Self { display_name }
    }
}

/// Partial update applied to an existing profile row.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarded: Option<bool>,
}

/// Push notification emitted by the identity backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    UserUpdated,
    TokenRefreshed,
    PasswordRecovery,
    /// Event name the client does not recognize. Carried for observability.
    Unknown(String),
}

impl AuthEvent {
    /// Canonical wire name for the event.
    pub fn as_str(&self) -> &str {
        match self {
            AuthEvent::SignedIn => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
            AuthEvent::UserUpdated => "USER_UPDATED",
            AuthEvent::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEvent::PasswordRecovery => "PASSWORD_RECOVERY",
            AuthEvent::Unknown(name) => name,
        }
    }
}

impl From<&str> for AuthEvent {
    fn from(raw: &str) -> Self {
        match raw {
            "SIGNED_IN" => AuthEvent::SignedIn,
            "SIGNED_OUT" => AuthEvent::SignedOut,
            "USER_UPDATED" => AuthEvent::UserUpdated,
            "TOKEN_REFRESHED" => AuthEvent::TokenRefreshed,
            "PASSWORD_RECOVERY" => AuthEvent::PasswordRecovery,
            other => AuthEvent::Unknown(other.to_string()),
        }
    }
}

/// Payload delivered on the backend's push-event stream.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthEvent,
    /// Session accompanying the event, when the backend has one.
    pub session: Option<Session>,
}
