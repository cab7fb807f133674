//! Saga error types.

use common::AggregateId;
use domain::{DomainError, MoneyError, OrderError, PaymentError};
use messaging::{HandlerError, MessagingError, Version};
use resilience::{Classify, ErrorKind};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::webhook::WebhookError;

/// Errors raised by the saga participants.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Another writer committed the aggregate since it was loaded.
    #[error("Concurrency conflict on {aggregate_type} {aggregate_id}: expected version {expected}, found {actual}")]
    Concurrency {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    #[error("{aggregate_type} not found: {id}")]
    NotFound {
        aggregate_type: &'static str,
        id: AggregateId,
    },

    /// The event depends on a fact this service has not seen yet.
    #[error("Waiting for prerequisite: {0}")]
    NotYetKnown(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl SagaError {
    /// True when redelivering the triggering message may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Concurrency { .. } | SagaError::NotYetKnown(_) => true,
            SagaError::Gateway(e) => e.kind().is_transient(),
            SagaError::Messaging(e) => e.kind().is_transient(),
            _ => false,
        }
    }
}

impl Classify for SagaError {
    fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Gateway(e) => e.kind(),
            SagaError::Messaging(e) => e.kind(),
            SagaError::Concurrency { .. } | SagaError::NotYetKnown(_) => ErrorKind::Unavailable,
            SagaError::Validation(_) | SagaError::Webhook(_) => ErrorKind::Validation,
            SagaError::Domain(DomainError::Serialization(_) | DomainError::UnknownEvent(_)) => {
                ErrorKind::Validation
            }
            SagaError::Domain(_) | SagaError::NotFound { .. } => ErrorKind::Business,
        }
    }
}

impl From<SagaError> for HandlerError {
    fn from(err: SagaError) -> Self {
        if err.is_transient() {
            HandlerError::Retry(err.to_string())
        } else {
            HandlerError::Reject(err.to_string())
        }
    }
}

impl From<OrderError> for SagaError {
    fn from(err: OrderError) -> Self {
        SagaError::Domain(DomainError::Order(err))
    }
}

impl From<PaymentError> for SagaError {
    fn from(err: PaymentError) -> Self {
        SagaError::Domain(DomainError::Payment(err))
    }
}

impl From<MoneyError> for SagaError {
    fn from(err: MoneyError) -> Self {
        SagaError::Domain(DomainError::Money(err))
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
