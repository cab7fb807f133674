//! Payment aggregate and related types.

mod aggregate;
mod events;
mod status;

pub use aggregate::{FAILURE_REASON_KEY, Payment, REFUND_REASON_KEY};
pub use events::{
    PaymentCreatedData, PaymentEvent, PaymentFailedData, PaymentProcessingData,
    PaymentRefundedData, PaymentSucceededData,
};
pub use status::PaymentStatus;

use thiserror::Error;

use crate::money::MoneyError;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error(transparent)]
    Money(#[from] MoneyError),
}
