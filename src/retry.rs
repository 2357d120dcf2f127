//! Retry with exponential backoff.
//!
//! Used by the reachability prober (per-probe attempts within one cycle)
//! and by bring-up polling. Backoff doubles from a base delay up to a cap.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry policy: attempt count plus backoff shape.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff: `base`, `2*base`, `4*base`, … capped at `cap`.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Run `f` until it succeeds, attempts exhaust, or `cancel` fires.
    ///
    /// Cancellation during backoff stops retrying and returns the last
    /// error; the caller is expected to be on its way down.
    ///
    /// # Errors
    ///
    /// The last error produced by `f` once attempts are exhausted or the
    /// token is cancelled.
    pub async fn retry<F, Fut, T, E>(&self, cancel: &CancellationToken, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "retry: succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt >= self.max_attempts {
                        warn!(attempts = attempt, error = %e, "retry: attempts exhausted");
                        return Err(e);
                    }
                    if cancel.is_cancelled() {
                        return Err(e);
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        attempt,
                        max = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retry: attempt failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(e),
                    }
                }
            }
        }
    }
}
