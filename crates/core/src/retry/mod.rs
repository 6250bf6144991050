//! Exponential-backoff retry for throttling-class failures.
//!
//! Only errors reporting [`Retryable::is_retryable`] are retried. Every
//! attempt and every backoff sleep races the caller's [`CancellationToken`],
//! so cancellation is observed promptly and reported as
//! [`RetryError::Cancelled`], never as the underlying error.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default total attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Classifies errors for the retry loop.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Outcome of a failed retried operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
    #[error("non-retryable failure on attempt {attempts}: {source}")]
    Permanent {
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up; `None` when cancelled.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Exhausted { attempts, .. } | RetryError::Permanent { attempts, .. } => {
                Some(*attempts)
            }
        }
    }
}

/// Attempt and backoff bookkeeping of a single logical operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    backoffs: Vec<Duration>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts started so far, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts that were retries of an earlier failure.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Backoff delays slept between attempts, in order.
    pub fn backoffs(&self) -> &[Duration] {
        &self.backoffs
    }
}

/// Retry configuration. Stateless and cheap to clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self::default()
            .with_max_attempts(max_attempts)
            .with_initial_delay(initial_delay)
            .with_max_delay(max_delay)
    }

    /// Total attempts; at least one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Cap on a single backoff; never below the initial delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay.max(self.initial_delay)
    }

    /// Delay slept before retry number `retry` (zero-based): the initial
    /// delay doubled `retry` times, capped at the maximum delay.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay())
    }

    /// Runs `operation` until it succeeds, fails permanently, exhausts the
    /// attempt budget, or `cancel` fires.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state = RetryState::new();
        self.execute_with_state(cancel, &mut state, operation).await
    }

    /// Like [`execute`](Self::execute), recording attempts and backoffs into `state`.
    pub async fn execute_with_state<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        state: &mut RetryState,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            state.attempts += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = operation() => outcome,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(RetryError::Permanent {
                    attempts: state.attempts,
                    source: error,
                });
            }

            if state.attempts >= self.max_attempts {
                tracing::error!(
                    attempts = state.attempts,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: state.attempts,
                    source: error,
                });
            }

            let delay = self.backoff_for(state.attempts - 1);
            tracing::warn!(
                attempt = state.attempts,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable failure, backing off"
            );
            state.backoffs.push(delay);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
