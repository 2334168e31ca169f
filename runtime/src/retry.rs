//! Retry logic with exponential backoff for handling transient failures.
//!
//! [`RetryPolicy`] is the configuration, [`RetrySchedule`] is the explicit
//! state machine (attempt counter plus backoff function) that walks it, and
//! [`retry_with_backoff`] / [`retry_with_predicate`] drive an async operation
//! through a schedule.
//!
//! `max_retries = N` means up to N retries after the first attempt, so an
//! operation that always fails runs N + 1 times.
//!
//! # Example
//!
//! ```rust
//! use sentinel_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let value = retry_with_backoff(&policy, || async {
//!     Ok::<_, String>(42)
//! })
//! .await
//! .map_err(|failure| failure.error)?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Delay before retry number `retry` (zero-based).
    ///
    /// `initial_delay * multiplier^retry`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let nanos = self.initial_delay.as_nanos() as f64 * factor;

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }

    /// Start a fresh schedule for one operation.
    #[must_use]
    pub const fn schedule(&self) -> RetrySchedule<'_> {
        RetrySchedule {
            policy: self,
            attempts: 0,
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(3),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_secs(1)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(30)),
            multiplier: self.multiplier.unwrap_or(2.0),
        }
    }
}

/// Attempt counter for one operation under a [`RetryPolicy`].
///
/// Call [`RetrySchedule::record_failure`] after each failed attempt. It
/// returns the delay to wait before the next attempt, or `None` once the
/// retries are used up.
#[derive(Debug, Clone)]
pub struct RetrySchedule<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
}

impl RetrySchedule<'_> {
    /// Attempts made so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retries made so far.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Record a failed attempt and get the backoff before the next one.
    pub fn record_failure(&mut self) -> Option<Duration> {
        let retry = self.attempts;
        self.attempts = self.attempts.saturating_add(1);
        (retry < self.policy.max_retries).then(|| self.policy.delay_for_attempt(retry))
    }
}

/// The last error of an operation that did not succeed, with the attempt count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    /// Error from the final attempt
    pub error: E,
    /// Attempts made, first attempt included
    pub attempts: u32,
    /// Whether the error was retryable (false means the predicate stopped early)
    pub exhausted: bool,
}

/// Retry an async operation with exponential backoff.
///
/// Every error is treated as retryable.
///
/// # Errors
///
/// Returns the final error wrapped in [`RetryFailure`] once the retries are
/// used up.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, |_| true).await
}

/// Retry an async operation, giving up early on errors the predicate rejects.
///
/// # Errors
///
/// Returns the final error wrapped in [`RetryFailure`] when the predicate
/// rejects it or the retries are used up.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut schedule = policy.schedule();

    loop {
        match operation().await {
            Ok(result) => {
                if schedule.attempts() > 0 {
                    tracing::info!(
                        retries = schedule.attempts(),
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                    return Err(RetryFailure {
                        error: err,
                        attempts: schedule.attempts() + 1,
                        exhausted: false,
                    });
                }

                let Some(delay) = schedule.record_failure() else {
                    tracing::error!(
                        attempts = schedule.attempts(),
                        error = %err,
                        "Operation failed after max retries"
                    );
                    return Err(RetryFailure {
                        error: err,
                        attempts: schedule.attempts(),
                        exhausted: true,
                    });
                };

                tracing::warn!(
                    attempt = schedule.attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
