//! Order aggregate and related types.

mod aggregate;
mod events;
mod status;
mod value_objects;

pub use aggregate::Order;
pub use events::{
    FailureStage, OrderCancelledData, OrderConfirmedData, OrderCreatedData, OrderEvent,
    OrderFailedData, OrderItemAddedData, OrderItemRemovedData, OrderStatusChangedData,
};
pub use status::OrderStatus;
pub use value_objects::{CustomerId, OrderItem, ProductId};

use thiserror::Error;

use crate::money::MoneyError;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Items in one order must share a currency.
    #[error("Currency mismatch: order is in {expected}, item is in {found}")]
    CurrencyMismatch { expected: String, found: String },

    /// The operation is not allowed in the current status.
    #[error("Cannot {action} while order is {status}")]
    InvalidState {
        status: OrderStatus,
        action: &'static str,
    },

    #[error("Item not found: {product_id}")]
    ItemNotFound { product_id: String },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    #[error("Quantity for {product_id} exceeds {max}", max = u32::MAX)]
    QuantityOverflow { product_id: String },

    #[error(transparent)]
    Money(#[from] MoneyError),
}
