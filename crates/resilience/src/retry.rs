//! Exponential backoff with jitter for transient failures.

use std::fmt::{self, Display};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::classify::{Classify, ErrorKind};

/// Passed to the `on_retry` callback before each backoff sleep.
pub struct RetryAttempt<'a> {
    /// The attempt that just failed (1-based).
    pub attempt: u32,
    pub error: &'a dyn Display,
    pub kind: ErrorKind,
    /// The sleep before the next attempt.
    pub delay: Duration,
}

type OnRetry = Arc<dyn Fn(&RetryAttempt<'_>) + Send + Sync>;

/// Errors returned by [`RetryPolicy::execute`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    /// The error is not retryable; it was returned after the attempt that raised it.
    #[error("{0}")]
    NonRetryable(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::NonRetryable(e) => e,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::NonRetryable(e) => e,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Exhausted { attempts, .. } => Some(*attempts),
            RetryError::NonRetryable(_) => None,
        }
    }
}

/// Retry executor.
///
/// `delay(n) = min(max_delay, initial_delay * factor^(n-1))`, optionally
/// scaled by a random factor in `[0.8, 1.2]` and capped again at `max_delay`.
/// `max_delay` bounds each wait, not the total elapsed time.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    factor: f64,
    jitter: bool,
    retryable: Option<Vec<ErrorKind>>,
    on_retry: Option<OnRetry>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            jitter: true,
            retryable: None,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("factor", &self.factor)
            .field("jitter", &self.jitter)
            .field("retryable", &self.retryable)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = if factor.is_finite() && factor >= 1.0 { factor } else { 1.0 };
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Restricts retries to these kinds instead of the network/timeout default.
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = Some(kinds.into_iter().collect());
        self
    }

    /// Installs a callback fired before every backoff sleep.
    ///
    /// A panic inside the callback is caught and logged.
    pub fn on_retry(mut self, callback: impl Fn(&RetryAttempt<'_>) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        match &self.retryable {
            Some(kinds) => kinds.contains(&kind),
            None => kind.is_transient(),
        }
    }

    /// Un-jittered delay after the given failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if raw.is_finite() && raw < cap {
            Duration::from_secs_f64(raw.max(0.0))
        } else {
            self.max_delay
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let scale = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_secs_f64(delay.as_secs_f64() * scale).min(self.max_delay)
    }

    fn notify(&self, attempt: &RetryAttempt<'_>) {
        if let Some(callback) = &self.on_retry
            && catch_unwind(AssertUnwindSafe(|| callback(attempt))).is_err()
        {
            tracing::warn!(attempt = attempt.attempt, "on_retry callback panicked");
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is reached. The closure receives the 1-based attempt.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let kind = error.kind();
            if !self.is_retryable(kind) {
                tracing::debug!(attempt, kind = kind.as_str(), error = %error, "non-retryable failure");
                return Err(RetryError::NonRetryable(error));
            }

            if attempt >= self.max_attempts {
                tracing::warn!(attempt, error = %error, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.jittered(self.delay_for_attempt(attempt));
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                kind = kind.as_str(),
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "operation failed, retrying after delay"
            );
            self.notify(&RetryAttempt {
                attempt,
                error: &error,
                kind,
                delay,
            });
            metrics::counter!("retry_attempts_total", "kind" => kind.as_str()).increment(1);

            tokio::time::sleep(delay).await;
        }
    }
}
