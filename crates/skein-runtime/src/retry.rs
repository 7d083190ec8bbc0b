//! Retry with exponential backoff for calls that must eventually succeed.
//!
//! [`with_retries`] runs a remote call until it succeeds or fails with an
//! error that waiting cannot fix. The delay bookkeeping lives in [`Backoff`],
//! a plain state machine with no timers, so its behaviour can be checked
//! without sleeping.
//!
//! | Failure | Strategy |
//! |---------|----------|
//! | network error, 5xx | retry after the exponential delay |
//! | 429 with retry-after | wait exactly that long, then reset the backoff |
//! | 429 without retry-after | retry after the exponential delay |
//! | anything else | return the error |
//!
//! The exponential delay skips the very first wait, then starts at twice the
//! initial delay and doubles up to the configured ceiling.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use skein_core::{ApiError, ApiResult};

/// How to react to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Retry after the exponential delay.
    Retry,
    /// Retry after exactly this delay and reset the backoff.
    RetryAfter(Duration),
    /// Give up and return the error.
    Rethrow,
}

impl Strategy {
    /// Classifies a failed remote call.
    pub fn classify(error: &ApiError) -> Self {
        match error {
            ApiError::TooManyRequests {
                retry_after: Some(delay),
            } => Self::RetryAfter(*delay),
            ApiError::TooManyRequests { retry_after: None }
            | ApiError::Network(_)
            | ApiError::Server { .. } => Self::Retry,
            _ => Self::Rethrow,
        }
    }
}

/// Floor for the initial delay, so a zero setting cannot spin.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Backoff state of one retried call.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    last: Duration,
    retried: bool,
}

impl Backoff {
    /// Creates a fresh backoff.
    pub fn new(config: &RetryConfig) -> Self {
        let initial = config.initial_delay().max(MIN_DELAY);
        Self {
            initial,
            max: config.max_delay().max(initial),
            last: initial,
            retried: false,
        }
    }

    /// Returns how long to wait before the next attempt, or `None` to give up.
    pub fn next_delay(&mut self, strategy: Strategy) -> Option<Duration> {
        match strategy {
            Strategy::Rethrow => None,
            Strategy::RetryAfter(delay) => {
                self.reset();
                Some(delay)
            }
            Strategy::Retry => {
                let delay = if self.retried {
                    self.last
                } else {
                    Duration::ZERO
                };
                self.retried = true;
                self.last = self.last.saturating_mul(2).min(self.max);
                Some(delay)
            }
        }
    }

    /// Resets to the initial delay, with the next retry immediate again.
    pub fn reset(&mut self) {
        self.last = self.initial;
        self.retried = false;
    }
}

/// Runs `task` until it succeeds, retrying retryable failures.
///
/// Cancelling `cancel` aborts the attempt in flight or the wait between
/// attempts, and the call fails with [`ApiError::Cancelled`].
pub async fn with_retries<T, F, Fut>(
    mut task: F,
    config: &RetryConfig,
    cancel: &CancellationToken,
) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut backoff = Backoff::new(config);

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            outcome = task() => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let Some(delay) = backoff.next_delay(Strategy::classify(&error)) else {
            debug!(error = %error, "Call failed with a non-retryable error");
            return Err(error);
        };
        warn!(error = %error, delay = ?delay, "Call failed, retrying");

        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
