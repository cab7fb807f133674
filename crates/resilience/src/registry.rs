use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, StateChange};

type OnStateChange = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Breakers keyed by dependency name, so every caller of one dependency
/// shares a single breaker.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
    on_state_change: Option<OnStateChange>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            default_config,
            on_state_change: None,
        }
    }

    /// Callback installed on every breaker created after this call.
    pub fn with_on_state_change(mut self, callback: impl Fn(&StateChange) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Arc::new(callback));
        self
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config.clone())
    }

    /// `config` is only used if the breaker does not exist yet.
    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = name, "registering circuit breaker");
                Arc::new(CircuitBreaker::new(name, config).with_shared_callback(self.on_state_change.clone()))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Current state of every registered breaker, sorted by name.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut states: Vec<_> = breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
