//! Domain layer for the order saga.
//!
//! This crate provides:
//! - `Money`, an immutable currency amount
//! - the `Aggregate` and `DomainEvent` traits with pending-event recording
//! - the Order and Payment aggregates as state machines
//! - the order, payment and inventory event catalogue and its subjects

pub mod aggregate;
pub mod catalogue;
pub mod error;
pub mod inventory;
pub mod money;
pub mod order;
pub mod payment;
pub mod subjects;

pub use aggregate::{Aggregate, DomainEvent, RecordedEvent};
pub use catalogue::CatalogueEvent;
pub use error::{DomainError, Result};
pub use inventory::{InventoryEvent, ReleaseReason, ReservedItem, UnavailableItem};
pub use money::{Money, MoneyError};
pub use order::{
    CustomerId, FailureStage, Order, OrderError, OrderEvent, OrderItem, OrderStatus, ProductId,
};
pub use payment::{Payment, PaymentError, PaymentEvent, PaymentStatus};
