//! Bounded retry with exponential backoff for single remote calls.

use identity_client::IdentityResult;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Configuration for per-call retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Backoff after the first failed attempt; doubles per attempt.
    pub backoff_base: Duration,
    /// Cap on the backoff duration.
    pub backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Delay after the given failed attempt (1-indexed): `base * 2^(attempt-1)`,
    /// capped at `backoff_max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.backoff_base.as_millis() as u64;
        let max_ms = self.backoff_max.as_millis() as u64;
        let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Executes one remote call with bounded, transient-only retry.
///
/// Pure retry plumbing: no state beyond timing, reusable for any remote
/// call. The final error is returned untouched so the caller decides
/// fatality.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `op`, retrying transient failures up to the attempt bound.
    ///
    /// Success returns immediately with no delay. Non-transient errors are
    /// returned without retrying.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> IdentityResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = IdentityResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.config.delay_for_attempt(attempt);
                    debug!(
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Call failed with transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
