//! # Identity client: collaborator contracts for session management
//!
//! This crate defines the boundary to the two remote collaborators the
//! session layer depends on:
//!
//! - **[`IdentityBackend`]**: sign-in/sign-out/signup RPCs, session and user
//!   lookups, and a push-style auth-event subscription.
//! - **[`ProfileStore`]**: application profile rows keyed by user id,
//!   independently fetchable and failable.
//!
//! Both are expressed as traits so the session layer can be driven by fakes
//! in tests, with HTTP implementations ([`HttpIdentityBackend`],
//! [`HttpProfileStore`]) against a Supabase-style REST surface
//! (`/auth/v1/*` for auth, `/rest/v1/profiles` for profile rows).

mod error;
mod http;
mod types;

pub use error::{IdentityError, IdentityResult};
pub use http::{HttpIdentityBackend, HttpProfileStore, IdentityConfig};
pub use types::{AuthChange, AuthEvent, Profile, ProfilePatch, ProfileSeed, Session, User};

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Remote identity backend contract.
///
/// `get_session` must be side-effect free; it doubles as the reachability
/// probe for connection monitoring.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Current session, or `None` when the user is signed out.
    async fn get_session(&self) -> IdentityResult<Option<Session>>;

    /// User record for the current session, or `None` without a session.
    async fn get_user(&self) -> IdentityResult<Option<User>>;

    /// Authenticate with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> IdentityResult<User>;

    /// Invalidate the current session on the backend.
    async fn sign_out(&self) -> IdentityResult<()>;

    /// Register a new account.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<serde_json::Value>,
    ) -> IdentityResult<User>;

    /// Subscribe to the backend's push-event stream.
    ///
    /// Unsubscribing is dropping the receiver; the backend must tolerate
    /// receivers coming and going at any time.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

/// Application profile store contract.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile for `user_id`, creating it from `seed` when the row
    /// does not exist yet.
    async fn get_or_create(&self, user_id: &str, seed: ProfileSeed)
        -> IdentityResult<Option<Profile>>;

    /// Apply a partial update to an existing profile row.
    async fn update(&self, user_id: &str, patch: ProfilePatch) -> IdentityResult<Profile>;
}
