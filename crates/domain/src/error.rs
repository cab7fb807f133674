//! Domain error types.

use messaging::MessagingError;
use thiserror::Error;

use crate::money::MoneyError;
use crate::order::OrderError;
use crate::payment::PaymentError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Money error: {0}")]
    Money(#[from] MoneyError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// The event name is not part of the catalogue.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Envelope error: {0}")]
    Envelope(#[from] MessagingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DomainError>;
