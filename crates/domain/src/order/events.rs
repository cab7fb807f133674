//! Order domain events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CustomerId, OrderItem, OrderStatus, ProductId};
use crate::aggregate::DomainEvent;
use crate::money::Money;
use crate::subjects;

/// Saga step at which an order failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    InventoryCheck,
    StockReservation,
    PaymentProcessing,
}

impl FailureStage {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureStage::InventoryCheck => "inventory_check",
            FailureStage::StockReservation => "stock_reservation",
            FailureStage::PaymentProcessing => "payment_processing",
        }
    }
}

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderCreated(OrderCreatedData),
    OrderItemAdded(OrderItemAddedData),
    OrderItemRemoved(OrderItemRemovedData),
    OrderConfirmed(OrderConfirmedData),
    OrderStatusChanged(OrderStatusChangedData),
    OrderCancelled(OrderCancelledData),
    OrderFailed(OrderFailedData),
}

impl DomainEvent for OrderEvent {
    const EVENT_NAMES: &'static [&'static str] = &[
        "OrderCreated",
        "OrderItemAdded",
        "OrderItemRemoved",
        "OrderConfirmed",
        "OrderStatusChanged",
        "OrderCancelled",
        "OrderFailed",
    ];

    fn event_name(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::OrderItemAdded(_) => "OrderItemAdded",
            OrderEvent::OrderItemRemoved(_) => "OrderItemRemoved",
            OrderEvent::OrderConfirmed(_) => "OrderConfirmed",
            OrderEvent::OrderStatusChanged(_) => "OrderStatusChanged",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::OrderFailed(_) => "OrderFailed",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => subjects::ORDER_CREATED,
            OrderEvent::OrderItemAdded(_) => subjects::ORDER_ITEM_ADDED,
            OrderEvent::OrderItemRemoved(_) => subjects::ORDER_ITEM_REMOVED,
            OrderEvent::OrderConfirmed(_) => subjects::ORDER_CONFIRMED,
            OrderEvent::OrderStatusChanged(_) => subjects::ORDER_STATUS_CHANGED,
            OrderEvent::OrderCancelled(_) => subjects::ORDER_CANCELLED,
            OrderEvent::OrderFailed(_) => subjects::ORDER_FAILED,
        }
    }
}

/// Data for OrderCreated event. Carries everything the inventory and
/// payment services need to act without calling back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedData {
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
}

/// Data for OrderItemAdded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemAddedData {
    pub product_id: ProductId,
    /// Quantity added by this change, merged into any existing line.
    pub quantity: u32,
    pub unit_price: Money,
    /// Order total after the change.
    pub total_amount: Money,
}

/// Data for OrderItemRemoved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRemovedData {
    pub product_id: ProductId,
    pub total_amount: Money,
}

/// Data for OrderConfirmed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmedData {
    pub customer_id: CustomerId,
    pub total_amount: Money,
    pub confirmed_at: DateTime<Utc>,
}

/// Data for OrderStatusChanged event (shipping and delivery).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChangedData {
    pub previous_status: OrderStatus,
    pub new_status: OrderStatus,
    pub changed_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelledData {
    pub reason: String,
    /// A CONFIRMED order was already charged and needs a refund.
    pub previous_status: OrderStatus,
    pub cancelled_at: DateTime<Utc>,
}

/// Data for OrderFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFailedData {
    pub reason: String,
    pub failure_stage: FailureStage,
    /// True when stock was reserved and must be released.
    pub compensation_required: bool,
    pub failed_at: DateTime<Utc>,
}
