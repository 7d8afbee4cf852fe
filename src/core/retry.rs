//! Bounded retry with backoff
//!
//! The routing API is a flaky network service. Each attempt waits
//! `backoff(attempt_index)` first (so the first attempt does not wait), a
//! success returns at once, and running out of attempts hands back the last
//! failure unchanged.

use std::future::Future;
use std::time::Duration;

use log::warn;

use crate::core::error::{Error, Result};

/// Default number of attempts per routing request
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default backoff step: attempt `i` waits `i` seconds
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(1);

/// Linear backoff retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Wait before attempt `i` is `i * backoff_step`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// Run `operation`, retrying failures that [`Error::is_transient`] accepts
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_backoff(
            self.max_attempts,
            |attempt| self.delay_before(attempt),
            Error::is_transient,
            operation,
        )
        .await
    }
}

/// Generic bounded retry combinator.
///
/// `operation` receives the zero-based attempt index. Failures rejected by
/// `should_retry` are returned immediately.
pub async fn retry_with_backoff<T, F, Fut, B, P>(
    max_attempts: u32,
    backoff: B,
    should_retry: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    B: Fn(u32) -> Duration,
    P: Fn(&Error) -> bool,
{
    if max_attempts == 0 {
        return Err(Error::InvalidInput(
            "retry limit must allow at least one attempt".to_string(),
        ));
    }

    let mut attempt = 0;
    loop {
        let delay = backoff(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&err) && attempt + 1 < max_attempts => {
                warn!(
                    "⚠️  Attempt {}/{max_attempts} failed: {err}. Retrying in {:?}...",
                    attempt + 1,
                    backoff(attempt + 1)
                );
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
