//! Per-dependency circuit breaker.
//!
//! ```text
//!            failure_threshold consecutive failures
//!   Closed ───────────────────────────────────────► Open
//!     ▲                                              │
//!     │ success_threshold                            │ reset_timeout elapsed
//!     │ consecutive successes                        ▼
//!     └──────────────────────────────────────── HalfOpen
//!                    any probe failure ──► Open
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening.
    pub failure_threshold: u32,
    /// Consecutive probe successes in HalfOpen before closing.
    pub success_threshold: u32,
    /// Deadline for a single guarded call.
    pub timeout: Duration,
    /// Time the circuit stays Open before admitting a probe.
    pub reset_timeout: Duration,
    /// Probes admitted concurrently while HalfOpen.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(3),
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls.max(1);
        self
    }
}

/// Errors from a guarded call.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The call was rejected without invoking the operation.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The operation exceeded the breaker's per-call timeout.
    #[error("call through circuit breaker '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }
}

/// A transition reported to the `on_state_change` callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub name: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

type OnStateChange = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// Counters exposed for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Shared, lock-protected breaker for one logical dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    on_state_change: Option<OnStateChange>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

enum Admission {
    Allowed { probe: bool },
    Rejected,
}

/// An admitted call. A half-open probe that is dropped before it settles,
/// for instance by an outer timeout, gives its slot back and reopens the
/// circuit.
struct Slot<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Slot<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if self.settled || !self.probe {
            return;
        }
        tracing::warn!(breaker = %self.breaker.name, "half-open probe abandoned");
        self.breaker.record_failure(true);
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_in_flight: 0,
            }),
            on_state_change: None,
        }
    }

    /// Installs a callback run synchronously on every transition, outside
    /// the breaker's lock. It must return quickly.
    pub fn with_on_state_change(mut self, callback: impl Fn(&StateChange) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Arc::new(callback));
        self
    }

    pub(crate) fn with_shared_callback(mut self, callback: Option<OnStateChange>) -> Self {
        self.on_state_change = callback;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
        }
    }

    /// Runs `operation` through the breaker.
    ///
    /// While Open the operation is not invoked. A call that exceeds
    /// `config.timeout` is abandoned and counted as a failure.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_counting(operation, |_| true).await
    }

    /// Like [`call`](Self::call), but only errors for which `counts` returns
    /// true are recorded as failures. Any other error means the dependency
    /// answered, so it is recorded as a success and returned unchanged.
    pub async fn call_counting<F, Fut, T, E, P>(&self, operation: F, counts: P) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let slot = match self.admit() {
            Admission::Allowed { probe } => Slot::new(self, probe),
            Admission::Rejected => {
                tracing::debug!(breaker = %self.name, "call rejected, circuit open");
                metrics::counter!("circuit_breaker_rejections_total", "name" => self.name.clone())
                    .increment(1);
                return Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                });
            }
        };

        match tokio::time::timeout(self.config.timeout, operation()).await {
            Ok(Ok(value)) => {
                slot.succeeded();
                Ok(value)
            }
            Ok(Err(error)) => {
                if counts(&error) {
                    slot.failed();
                } else {
                    slot.succeeded();
                }
                Err(CircuitBreakerError::Inner(error))
            }
            Err(_) => {
                tracing::warn!(breaker = %self.name, timeout_ms = self.config.timeout.as_millis() as u64, "guarded call timed out");
                slot.failed();
                Err(CircuitBreakerError::Timeout {
                    name: self.name.clone(),
                    timeout: self.config.timeout,
                })
            }
        }
    }

    /// Like [`call`](Self::call), but maps any breaker error to a value.
    pub async fn call_with_fallback<F, Fut, T, E, FB>(&self, operation: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(CircuitBreakerError<E>) -> T,
    {
        match self.call(operation).await {
            Ok(value) => value,
            Err(error) => fallback(error),
        }
    }

    /// Forces the circuit open, as if the failure threshold had been hit.
    pub fn trip(&self) {
        let change = {
            let mut inner = self.lock();
            inner.consecutive_successes = 0;
            inner.half_open_in_flight = 0;
            self.transition(&mut inner, CircuitState::Open)
        };
        self.emit(change);
    }

    /// Closes the circuit and clears all counters.
    pub fn reset(&self) {
        let change = {
            let mut inner = self.lock();
            inner.consecutive_failures = 0;
            inner.consecutive_successes = 0;
            inner.half_open_in_flight = 0;
            self.transition(&mut inner, CircuitState::Closed)
        };
        self.emit(change);
    }

    fn admit(&self) -> Admission {
        let (admission, change) = {
            let mut inner = self.lock();
            let mut change = None;

            if inner.state == CircuitState::Open {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if !elapsed {
                    return Admission::Rejected;
                }
                inner.consecutive_successes = 0;
                inner.half_open_in_flight = 0;
                change = self.transition(&mut inner, CircuitState::HalfOpen);
            }

            let admission = match inner.state {
                CircuitState::Closed => Admission::Allowed { probe: false },
                CircuitState::HalfOpen if inner.half_open_in_flight < self.config.half_open_max_calls => {
                    inner.half_open_in_flight += 1;
                    Admission::Allowed { probe: true }
                }
                _ => Admission::Rejected,
            };
            (admission, change)
        };
        self.emit(change);
        admission
    }

    fn record_success(&self, probe: bool) {
        let change = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                CircuitState::HalfOpen if probe => {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        inner.consecutive_failures = 0;
                        inner.consecutive_successes = 0;
                        self.transition(&mut inner, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                // A call admitted before the circuit opened; its outcome is stale.
                _ => None,
            }
        };
        self.emit(change);
    }

    fn record_failure(&self, probe: bool) {
        let change = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        self.transition(&mut inner, CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen if probe => {
                    inner.half_open_in_flight = 0;
                    inner.consecutive_successes = 0;
                    self.transition(&mut inner, CircuitState::Open)
                }
                _ => None,
            }
        };
        self.emit(change);
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) -> Option<StateChange> {
        let from = inner.state;
        if to == CircuitState::Open {
            inner.opened_at = Some(Instant::now());
        }
        if from == to {
            return None;
        }
        inner.state = to;
        Some(StateChange {
            name: self.name.clone(),
            from,
            to,
        })
    }

    fn emit(&self, change: Option<StateChange>) {
        let Some(change) = change else {
            return;
        };
        tracing::info!(
            breaker = %change.name,
            from = %change.from,
            to = %change.to,
            "circuit breaker state changed"
        );
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "name" => change.name.clone(),
            "to" => change.to.as_str()
        )
        .increment(1);
        if let Some(callback) = &self.on_state_change {
            callback(&change);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "product-service",
            CircuitBreakerConfig::default()
                .with_failure_threshold(3)
                .with_success_threshold(2)
                .with_timeout(Duration::from_secs(1))
                .with_reset_timeout(Duration::from_secs(10)),
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        b.call(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), CircuitBreakerError<&'static str>> {
        b.call(|| async { Ok::<(), &'static str>(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_consecutive_failures() {
        let b = breaker();
        for _ in 0..2 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), CircuitState::Closed);
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count_while_closed() {
        let b = breaker();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        succeed(&b).await.unwrap();
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_does_not_invoke_operation() {
        let b = breaker();
        b.trip();
        let calls = AtomicU32::new(0);

        let result = b
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &'static str>(())
            })
            .await;

        assert!(result.unwrap_err().is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_one_probe_at_a_time() {
        let b = Arc::new(breaker());
        b.trip();
        tokio::time::advance(Duration::from_secs(11)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let b = b.clone();
            tokio::spawn(async move {
                b.call(|| async move {
                    let _ = release_rx.await;
                    Ok::<(), &'static str>(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let second = succeed(&b).await;
        assert!(second.unwrap_err().is_open());

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closes_after_success_threshold_probes() {
        let b = breaker();
        b.trip();
        tokio::time::advance(Duration::from_secs(11)).await;

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens() {
        let b = breaker();
        b.trip();
        tokio::time::advance(Duration::from_secs(11)).await;

        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        assert!(succeed(&b).await.unwrap_err().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_and_counts_as_failure() {
        let b = CircuitBreaker::new(
            "slow",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_timeout(Duration::from_millis(50)),
        );

        let result = b
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), &'static str>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Timeout { .. })));
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_reopens_instead_of_wedging() {
        let b = breaker();
        b.trip();
        tokio::time::advance(Duration::from_secs(11)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            b.call(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<(), &'static str>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;
        succeed(&b).await.unwrap();
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn uncounted_errors_leave_the_circuit_closed() {
        let b = breaker();
        for _ in 0..5 {
            let result = b
                .call_counting(|| async { Err::<(), _>("not found") }, |_| false)
                .await;
            assert!(matches!(result, Err(CircuitBreakerError::Inner("not found"))));
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn uncounted_error_releases_a_probe_slot() {
        let b = breaker();
        b.trip();
        tokio::time::advance(Duration::from_secs(11)).await;

        let _ = b.call_counting(|| async { Err::<(), _>("not found") }, |_| false).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_receives_rejection() {
        let b = breaker();
        b.trip();
        let value = b
            .call_with_fallback(
                || async { Ok::<&str, &str>("live") },
                |e| if e.is_open() { "cached" } else { "error" },
            )
            .await;
        assert_eq!(value, "cached");
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let b = breaker().with_on_state_change(move |c| sink.lock().unwrap().push((c.from, c.to)));

        b.trip();
        tokio::time::advance(Duration::from_secs(11)).await;
        succeed(&b).await.unwrap();
        succeed(&b).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }
}
