//! Bounded retry for host calls.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::host::HostResult;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default increase of the delay per retry.
pub const DEFAULT_STEP: Duration = Duration::from_millis(150);

/// Retry policy with linearly increasing backoff.
///
/// Retry `n` (0-based) waits `base_delay + n * step`. Only transient host
/// errors are retried; anything else is returned at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Added delay per further retry.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            step: DEFAULT_STEP,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            step: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay + self.step * retry
    }

    /// Run `op`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the last transient error
    /// once retries are exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> HostResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HostResult<T>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    debug!(error = %e, retry = retry + 1, ?delay, "Retrying host call");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
