//! Retry logic with configurable backoff
//!
//! One retry policy for every call site: a [`RetryConfig`] (retry budget, backoff
//! schedule, optional jitter) plus an [`IsRetryable`] classifier on the error type.
//! The answer-sheet worker, roster fetches, and metadata calls all go through
//! [`with_retry`].
//!
//! # Example
//!
//! ```no_run
//! use answersheet_dl::retry::{IsRetryable, with_retry};
//! use answersheet_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{Backoff, RetryConfig};
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, rate limiting, 5xx) should return `true`.
/// Permanent failures (rejected credentials, bad configuration, missing resources) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Timeout(_) => true,
            // Throttling and server-side failures
            Error::UnexpectedStatus { status, .. } => *status == 429 || (500..600).contains(status),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Login failures are fatal for the current credentials
            Error::Auth(_) => false,
            Error::Api { .. } => false,
            Error::Config { .. } => false,
            Error::NotFound(_) => false,
            Error::FileCollision { .. } => false,
            Error::Serialization(_) => false,
            Error::Other(_) => false,
        }
    }
}

impl Backoff {
    /// Delay to wait before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::Linear { step, max } => step.saturating_mul(retry).min(*max),
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                Duration::try_from_secs_f64(secs)
                    .unwrap_or(*max)
                    .min(*max)
            }
        }
    }
}

/// Execute an async operation, retrying retryable failures per `config`
///
/// The operation runs at most `config.max_retries + 1` times. Before retry `k`
/// the task sleeps `config.backoff.delay(k)` (jittered if enabled).
///
/// # Returns
///
/// Returns the successful result, the first non-retryable error, or the last
/// error once the retry budget is spent.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    tracing::info!(attempts = retries + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && retries < config.max_retries => {
                retries += 1;

                let delay = config.backoff.delay(retries);
                let delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    retry = retries,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = retries + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
