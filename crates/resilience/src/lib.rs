//! Resilience primitives for synchronous calls to peer services.
//!
//! - [`RetryPolicy`]: exponential backoff with optional jitter for transient errors
//! - [`CircuitBreaker`]: per-dependency fail-fast state machine
//! - [`CircuitBreakerRegistry`]: one shared breaker per dependency name
//! - [`guarded_call`]: breaker-gated retrying call

pub mod circuit_breaker;
pub mod classify;
pub mod registry;
pub mod retry;

use std::fmt::Display;
use std::future::Future;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    StateChange,
};
pub use classify::{Classify, ErrorKind};
pub use registry::CircuitBreakerRegistry;
pub use retry::{RetryAttempt, RetryError, RetryPolicy};

/// Runs `operation` under `retry`, with the whole retrying call gated by
/// `breaker`.
///
/// The breaker is consulted first, so an open circuit rejects the call
/// without a single attempt or backoff sleep. Exhausted retries count as
/// one breaker failure. Errors whose kind does not
/// [trip the breaker](ErrorKind::trips_breaker) are returned without
/// counting against it.
pub async fn guarded_call<F, Fut, T, E>(
    breaker: &CircuitBreaker,
    retry: &RetryPolicy,
    operation: F,
) -> Result<T, CircuitBreakerError<RetryError<E>>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    breaker
        .call_counting(|| retry.execute(operation), |error| error.inner().kind().trips_breaker())
        .await
}
