//! Payment processor port and an in-memory processor for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{CustomerId, Money};
use resilience::{Classify, ErrorKind};
use thiserror::Error;
use tokio::sync::Mutex;

/// A charge request. The processor deduplicates on `idempotency_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub idempotency_key: String,
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub amount: Money,
}

/// The processor's answer to a charge it was able to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { charge_id: String },
    Declined { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("payment processor timed out")]
    Timeout,

    #[error("payment processor unavailable: {0}")]
    Unavailable(String),

    #[error("payment processor rejected the request: {0}")]
    Rejected(String),
}

impl Classify for GatewayError {
    fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Timeout => ErrorKind::Timeout,
            GatewayError::Unavailable(_) => ErrorKind::Unavailable,
            GatewayError::Rejected(_) => ErrorKind::Validation,
        }
    }
}

/// External payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, GatewayError>;

    /// Refunds a previous charge in full.
    async fn refund(&self, charge_id: &str, amount: &Money) -> Result<(), GatewayError>;
}

#[derive(Debug, Default)]
struct FakeState {
    charges: HashMap<String, ChargeOutcome>,
    refunds: Vec<(String, Money)>,
    next_id: u32,
    decline_reason: Option<String>,
    outages: u32,
    attempts: u32,
}

/// In-memory processor with switches for declines and outages.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<FakeState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every new charge with `reason` until cleared with `None`.
    pub async fn set_decline(&self, reason: Option<&str>) {
        self.state.lock().await.decline_reason = reason.map(str::to_string);
    }

    /// Fails the next `calls` charge attempts as unavailable.
    pub async fn fail_next(&self, calls: u32) {
        self.state.lock().await.outages = calls;
    }

    /// Charge attempts received, including failed ones.
    pub async fn attempts(&self) -> u32 {
        self.state.lock().await.attempts
    }

    /// Distinct charges evaluated.
    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.charges.len()
    }

    pub async fn refunds(&self) -> Vec<(String, Money)> {
        self.state.lock().await.refunds.clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;

        if state.outages > 0 {
            state.outages -= 1;
            return Err(GatewayError::Unavailable("processor offline".to_string()));
        }

        if let Some(existing) = state.charges.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let outcome = match &state.decline_reason {
            Some(reason) => ChargeOutcome::Declined {
                reason: reason.clone(),
            },
            None => {
                state.next_id += 1;
                ChargeOutcome::Approved {
                    charge_id: format!("ch_{:06}", state.next_id),
                }
            }
        };
        state
            .charges
            .insert(request.idempotency_key, outcome.clone());
        Ok(outcome)
    }

    async fn refund(&self, charge_id: &str, amount: &Money) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        let known = state
            .charges
            .values()
            .any(|o| matches!(o, ChargeOutcome::Approved { charge_id: id } if id == charge_id));
        if !known {
            return Err(GatewayError::Rejected(format!("unknown charge {charge_id}")));
        }
        if !state.refunds.iter().any(|(id, _)| id == charge_id) {
            state.refunds.push((charge_id.to_string(), amount.clone()));
        }
        Ok(())
    }
}
