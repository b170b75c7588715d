//! Session state snapshot types.
//!
//! Exactly one [`SessionState`] is live per coordinator. It is replaced
//! atomically on every transition; readers only ever see complete values,
//! never a half-updated one.

use crate::error::{FailureKind, SessionError};
use chrono::{DateTime, Utc};
use identity_client::{Profile, User};
use serde::{Deserialize, Serialize};

/// Authentication status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session (initial state, after logout, or after forced reset).
    Unauthenticated,
    /// A refresh or login is in flight.
    Authenticating,
    /// Session and user are resolved.
    Authenticated,
    /// The last refresh failed but previous auth state is still held.
    AuthError,
}

/// Coarse backend reachability signal, independent of auth status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionHealth {
    Connected,
    Disconnected,
    /// Only ever set by a user-initiated retry, never by the background probe.
    Reconnecting,
}

/// Stored classification of the most recent failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&SessionError> for ErrorInfo {
    fn from(err: &SessionError) -> Self {
        Self {
            kind: err.kind(),
            message: err.user_message(),
        }
    }
}

/// Full session snapshot exposed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub connection: ConnectionHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    /// True once the first refresh has completed, successfully or not.
    pub initialized: bool,
}

impl SessionState {
    /// Empty state a coordinator starts from.
    pub fn empty() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            user: None,
            profile: None,
            error: None,
            connection: ConnectionHealth::Connected,
            last_sync_at: None,
            initialized: false,
        }
    }

    /// True when a user is resolved for the current session.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.status, SessionStatus::Authenticated)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::empty()
    }
}
