//! Session error taxonomy.
//!
//! The coordinator classifies collaborator failures into a small set of
//! kinds so callers get a stable, human-readable message and the state
//! machine can decide fatality without inspecting transport details.

use identity_client::IdentityError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for session commands.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The whole refresh exceeded its time bound.
    #[error("Session refresh timed out")]
    Timeout,

    /// Transient transport failure (retryable).
    #[error("Network error: {0}")]
    Network(#[source] IdentityError),

    /// Logical rejection from the backend (bad credentials, revoked session).
    #[error("Backend error: {0}")]
    Backend(String),

    /// Profile store failure. Never fatal for the session itself.
    #[error("Profile store error: {0}")]
    Profile(#[source] IdentityError),

    /// Consecutive whole-refresh failures reached the limit.
    #[error("Session refresh failed {0} times in a row")]
    MaxRetriesExceeded(u32),
}

impl SessionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::Timeout => FailureKind::Timeout,
            SessionError::Network(_) => FailureKind::Network,
            SessionError::Backend(_) => FailureKind::Backend,
            SessionError::Profile(_) => FailureKind::Profile,
            SessionError::MaxRetriesExceeded(_) => FailureKind::MaxRetriesExceeded,
        }
    }

    /// Short message suitable for direct display.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Timeout => {
                "The request timed out. Check your connection and try again.".to_string()
            }
            SessionError::Network(_) => {
                "Could not reach the server. Check your connection.".to_string()
            }
            SessionError::Backend(message) => message.clone(),
            SessionError::Profile(_) => "Your profile could not be loaded.".to_string(),
            SessionError::MaxRetriesExceeded(_) => {
                "Connection lost repeatedly. You have been signed out.".to_string()
            }
        }
    }
}

impl From<IdentityError> for SessionError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Timeout => SessionError::Timeout,
            e if e.is_transient() => SessionError::Network(e),
            IdentityError::Profile(message) => {
                SessionError::Profile(IdentityError::Profile(message))
            }
            e => SessionError::Backend(e.to_string()),
        }
    }
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;

/// Coarse classification of a session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Network,
    Backend,
    Profile,
    MaxRetriesExceeded,
}
