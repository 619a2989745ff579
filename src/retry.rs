//! Retry logic for per-message processing
//!
//! Two kinds of failure are retried differently:
//!
//! - **Throttle**: the platform said "wait N seconds". The task sleeps for that
//!   long and tries again from the beginning. These retries are unbounded by
//!   default and never count toward the transient budget.
//! - **Transient**: retried up to [`RetryConfig::max_attempts`] times with
//!   exponential backoff and optional jitter. The default budget is zero, so an
//!   ordinary failure is terminal on first occurrence.
//!
//! Everything else is permanent and returned immediately. The loop is
//! iterative, so sustained throttling does not grow the stack.
//!
//! # Example
//!
//! ```no_run
//! use tg_cloud_export::retry::{IsRetryable, RetryClass, run_with_backoff};
//! use tg_cloud_export::config::RetryConfig;
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "flaky")
//!     }
//! }
//!
//! impl IsRetryable for Flaky {
//!     fn retry_class(&self) -> RetryClass {
//!         RetryClass::Transient
//!     }
//! }
//!
//! # async fn example() -> Result<(), Flaky> {
//! let config = RetryConfig::default();
//! run_with_backoff(&config, |_, _| {}, || async { Ok::<_, Flaky>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, PlatformError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// How an error should be treated by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Platform throttle: wait this long, then retry
    Throttle(Duration),
    /// Possibly temporary failure (timeouts, resets)
    Transient,
    /// Will not succeed on retry
    Permanent,
}

/// Trait for errors that can be classified for retry
pub trait IsRetryable {
    /// Classify this error
    fn retry_class(&self) -> RetryClass;
}

impl IsRetryable for Error {
    fn retry_class(&self) -> RetryClass {
        match self {
            Error::Platform(PlatformError::Throttled { wait }) => RetryClass::Throttle(*wait),
            Error::Platform(PlatformError::Download { .. }) => RetryClass::Transient,
            Error::Platform(PlatformError::History(_)) => RetryClass::Transient,
            Error::Platform(PlatformError::ChannelUnavailable { .. }) => RetryClass::Permanent,
            Error::Network(e) if e.is_timeout() || e.is_connect() => RetryClass::Transient,
            Error::Io(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                        | std::io::ErrorKind::NotConnected
                        | std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                RetryClass::Transient
            }
            Error::Upload(msg) => {
                let msg = msg.to_ascii_lowercase();
                if msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("temporar")
                    || msg.contains("busy")
                {
                    RetryClass::Transient
                } else {
                    RetryClass::Permanent
                }
            }
            _ => RetryClass::Permanent,
        }
    }
}

/// What the retry loop should do after a failure
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryAction {
    /// Sleep out a platform throttle, then retry
    WaitThrottle(Duration),
    /// Sleep for a backoff delay, then retry
    Backoff {
        /// 1-based transient retry number
        attempt: u32,
        /// Delay before the retry
        delay: Duration,
    },
    /// Stop and return the error
    GiveUp,
}

impl RetryAction {
    /// Sleep duration for retrying actions
    pub fn delay(&self) -> Option<Duration> {
        match self {
            RetryAction::WaitThrottle(d) => Some(*d),
            RetryAction::Backoff { delay, .. } => Some(*delay),
            RetryAction::GiveUp => None,
        }
    }
}

/// Stateful backoff policy for one operation
///
/// Throttle retries and transient retries are counted separately; a throttle
/// never consumes the transient budget.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    throttle_retry_limit: Option<u32>,
    throttle_padding: Duration,
    max_attempts: u32,
    delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
    throttle_retries: u32,
    transient_attempts: u32,
}

impl BackoffPolicy {
    /// Fresh policy state from configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            throttle_retry_limit: config.throttle_retry_limit,
            throttle_padding: config.throttle_padding,
            max_attempts: config.max_attempts,
            delay: config.initial_delay,
            max_delay: config.max_delay,
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            throttle_retries: 0,
            transient_attempts: 0,
        }
    }

    /// Decide the next step after a failure of the given class
    pub fn next_action(&mut self, class: RetryClass) -> RetryAction {
        match class {
            RetryClass::Throttle(wait) => {
                if self
                    .throttle_retry_limit
                    .is_some_and(|limit| self.throttle_retries >= limit)
                {
                    return RetryAction::GiveUp;
                }
                self.throttle_retries += 1;
                RetryAction::WaitThrottle(wait + self.throttle_padding)
            }
            RetryClass::Transient if self.transient_attempts < self.max_attempts => {
                self.transient_attempts += 1;
                let delay = if self.jitter {
                    add_jitter(self.delay)
                } else {
                    self.delay
                };
                let next =
                    Duration::from_secs_f64(self.delay.as_secs_f64() * self.backoff_multiplier);
                self.delay = next.min(self.max_delay);
                RetryAction::Backoff {
                    attempt: self.transient_attempts,
                    delay,
                }
            }
            RetryClass::Transient | RetryClass::Permanent => RetryAction::GiveUp,
        }
    }

    /// Throttle retries taken so far
    pub fn throttle_retries(&self) -> u32 {
        self.throttle_retries
    }

    /// Transient retries taken so far
    pub fn transient_attempts(&self) -> u32 {
        self.transient_attempts
    }
}

/// Execute an async operation under a [`BackoffPolicy`] built from `config`.
///
/// `on_retry` is called with the error and the chosen action before every
/// sleep, so callers can emit events. Only the calling task sleeps; other
/// tasks sharing the runtime keep running.
pub async fn run_with_backoff<F, Fut, T, E, H>(
    config: &RetryConfig,
    mut on_retry: H,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    H: FnMut(&E, &RetryAction),
{
    let mut policy = BackoffPolicy::new(config);

    loop {
        match operation().await {
            Ok(result) => {
                if policy.throttle_retries() > 0 || policy.transient_attempts() > 0 {
                    tracing::info!(
                        throttle_retries = policy.throttle_retries(),
                        transient_retries = policy.transient_attempts(),
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                let class = e.retry_class();
                let action = policy.next_action(class);
                match action {
                    RetryAction::WaitThrottle(wait) => {
                        tracing::warn!(
                            error = %e,
                            wait_ms = wait.as_millis() as u64,
                            throttle_retries = policy.throttle_retries(),
                            "Throttled by platform, waiting before retry"
                        );
                        on_retry(&e, &action);
                        tokio::time::sleep(wait).await;
                    }
                    RetryAction::Backoff { attempt, delay } => {
                        tracing::warn!(
                            error = %e,
                            attempt = attempt,
                            max_attempts = config.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Operation failed, retrying"
                        );
                        on_retry(&e, &action);
                        tokio::time::sleep(delay).await;
                    }
                    RetryAction::GiveUp => {
                        match class {
                            RetryClass::Throttle(_) => tracing::error!(
                                error = %e,
                                throttle_retries = policy.throttle_retries(),
                                "Throttle retry limit reached"
                            ),
                            RetryClass::Transient if config.max_attempts > 0 => tracing::error!(
                                error = %e,
                                attempts = policy.transient_attempts() + 1,
                                "Operation failed after all retry attempts exhausted"
                            ),
                            _ => tracing::debug!(error = %e, "Operation failed without retry"),
                        }
                        return Err(e);
                    }
                }
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
