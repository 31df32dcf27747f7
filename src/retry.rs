/*!
 * Retry logic with exponential backoff
 */

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;

/// Backoff schedule for catalog round-trips
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Total tries, including the first
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the delay added as random jitter
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            attempts: config.load_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            jitter_factor: 0.2,
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }

    fn jittered(&self, retry: u32) -> Duration {
        let delay = self.delay_for(retry);
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let jitter = rand::rng().random_range(0.0..self.jitter_factor);
        delay.mul_f64(1.0 + jitter).min(self.max)
    }
}

/// Run `operation` until it succeeds, fails permanently, or tries run out
///
/// Errors for which `is_retryable` returns false are returned immediately.
/// When every try fails the last error is returned.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                let delay = policy.jittered(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
