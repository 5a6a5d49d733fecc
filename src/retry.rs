//! Retry with exponential backoff and jitter.
//!
//! Cluster updates are read-modify-replace transactions guarded by the API
//! server's resourceVersion check. When a replace is rejected as stale the
//! whole transaction (fresh read included) is run again; partial retries
//! would write a view of the object nobody read.
//!
//! # Example
//!
//! ```ignore
//! use canary_serving::retry::{retry_with_backoff_if, RetryConfig};
//!
//! let result = retry_with_backoff_if(
//!     &RetryConfig::with_max_attempts(5),
//!     "update_ingress",
//!     Error::is_conflict,
//!     || async { read_modify_replace().await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Default number of attempts for conflict retries
pub const DEFAULT_CONFLICT_ATTEMPTS: u32 = 5;

/// Backoff settings for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, first try included (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CONFLICT_ATTEMPTS,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Single attempt, no retry
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }
}

/// Execute an async operation, retrying only errors accepted by `should_retry`.
///
/// Errors rejected by `should_retry` are returned immediately. Once
/// `max_attempts` is reached the last error is returned.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        if !should_retry(&err) {
            return Err(err);
        }
        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(
                operation = %operation_name,
                attempts = attempt,
                error = %err,
                "giving up"
            );
            return Err(err);
        }

        let pause = jittered(delay);
        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = pause.as_millis(),
            "retryable failure"
        );
        tokio::time::sleep(pause).await;

        delay = delay
            .mul_f64(config.backoff_multiplier)
            .min(config.max_delay);
    }
}

/// Spread `delay` uniformly over [delay / 2, 3 * delay / 2)
fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5))
}
