//! Session lifecycle coordination for identity-backed apps.
//!
//! This crate provides:
//! - A single-writer session state machine with value-copy snapshots
//! - Refresh with bounded retries, a hard timeout, and stale-result discard
//! - A grace period that keeps cached identity across transient failures
//! - Background connection probing with edge-only health transitions
//! - A bridge from backend auth push events to coordinator actions

mod bridge;
mod coordinator;
mod error;
mod facade;
mod monitor;
mod retry;
mod state;

#[cfg(test)]
mod test_support;

pub use coordinator::{CoordinatorConfig, SessionCoordinator};
pub use error::{FailureKind, SessionError, SessionResult};
pub use facade::SessionFacade;
pub use monitor::MonitorConfig;
pub use retry::{RetryConfig, RetryPolicy};
pub use state::{ConnectionHealth, ErrorInfo, SessionState, SessionStatus};
