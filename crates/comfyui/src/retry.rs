//! Exponential-backoff retry for transient ComfyUI failures.
//!
//! [`with_retry`] repeats an operation while it fails with a retryable
//! [`EngineError`], sleeping with increasing delays between attempts,
//! until it succeeds, the attempt budget is spent, or the
//! [`CancellationToken`] is triggered.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryConfig {
    /// A config that tries exactly once.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Grow `current` by the multiplier, capped at [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    current.mul_f64(config.multiplier).min(config.max_delay)
}

/// Run `op` until it succeeds or fails with a non-retryable error.
///
/// `idempotent` marks operations that are safe to repeat even when the
/// engine may have received the failed request (e.g. `GET`s).
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &'static str,
    idempotent: bool,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= max_attempts || !err.is_retryable(idempotent) {
            return Err(err);
        }

        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "ComfyUI call failed, retrying",
        );

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
