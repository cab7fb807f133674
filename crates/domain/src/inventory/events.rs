//! Inventory events.
//!
//! Reservation events use the order id as their aggregate id; stock level
//! events use the product id.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::DomainEvent;
use crate::order::{FailureStage, ProductId};
use crate::subjects;

/// Why reserved stock went back on the shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    PaymentFailed,
    OrderCancelled,
    OrderFailed,
    ReservationExpired,
}

impl ReleaseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseReason::PaymentFailed => "payment_failed",
            ReleaseReason::OrderCancelled => "order_cancelled",
            ReleaseReason::OrderFailed => "order_failed",
            ReleaseReason::ReservationExpired => "reservation_expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnavailableItem {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[allow(clippy::enum_variant_names)]
pub enum InventoryEvent {
    StockReserved(StockReservedData),
    StockReservationConfirmed(StockReservationConfirmedData),
    StockReleased(StockReleasedData),
    StockReservationFailed(StockReservationFailedData),
    LowStockEvent(LowStockData),
    OutOfStockEvent(OutOfStockData),
    StockReplenishedEvent(StockReplenishedData),
    InventoryAdjustedEvent(InventoryAdjustedData),
    StockTransferredEvent(StockTransferredData),
}

impl DomainEvent for InventoryEvent {
    const EVENT_NAMES: &'static [&'static str] = &[
        "StockReserved",
        "StockReservationConfirmed",
        "StockReleased",
        "StockReservationFailed",
        "LowStockEvent",
        "OutOfStockEvent",
        "StockReplenishedEvent",
        "InventoryAdjustedEvent",
        "StockTransferredEvent",
    ];

    fn event_name(&self) -> &'static str {
        match self {
            InventoryEvent::StockReserved(_) => "StockReserved",
            InventoryEvent::StockReservationConfirmed(_) => "StockReservationConfirmed",
            InventoryEvent::StockReleased(_) => "StockReleased",
            InventoryEvent::StockReservationFailed(_) => "StockReservationFailed",
            InventoryEvent::LowStockEvent(_) => "LowStockEvent",
            InventoryEvent::OutOfStockEvent(_) => "OutOfStockEvent",
            InventoryEvent::StockReplenishedEvent(_) => "StockReplenishedEvent",
            InventoryEvent::InventoryAdjustedEvent(_) => "InventoryAdjustedEvent",
            InventoryEvent::StockTransferredEvent(_) => "StockTransferredEvent",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            InventoryEvent::StockReserved(_) => subjects::INVENTORY_RESERVED,
            InventoryEvent::StockReservationConfirmed(_) => subjects::INVENTORY_RESERVATION_CONFIRMED,
            InventoryEvent::StockReleased(_) => subjects::INVENTORY_RELEASED,
            InventoryEvent::StockReservationFailed(_) => subjects::INVENTORY_RESERVATION_FAILED,
            InventoryEvent::LowStockEvent(_) => subjects::INVENTORY_LOW_STOCK,
            InventoryEvent::OutOfStockEvent(_) => subjects::INVENTORY_OUT_OF_STOCK,
            InventoryEvent::StockReplenishedEvent(_) => subjects::INVENTORY_REPLENISHED,
            InventoryEvent::InventoryAdjustedEvent(_) => subjects::INVENTORY_ADJUSTED,
            InventoryEvent::StockTransferredEvent(_) => subjects::INVENTORY_TRANSFERRED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReservedData {
    pub order_id: AggregateId,
    pub reservation_id: Uuid,
    pub items: Vec<ReservedItem>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReservationConfirmedData {
    pub order_id: AggregateId,
    pub reservation_id: Uuid,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReleasedData {
    pub order_id: AggregateId,
    pub reservation_id: Uuid,
    pub items: Vec<ReservedItem>,
    pub reason: ReleaseReason,
    pub released_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReservationFailedData {
    pub order_id: AggregateId,
    /// `inventory_check` when the products were rejected up front,
    /// `stock_reservation` when they were valid but short.
    pub failure_stage: FailureStage,
    pub reason: String,
    pub unavailable_items: Vec<UnavailableItem>,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockData {
    pub product_id: ProductId,
    pub available: u32,
    pub threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfStockData {
    pub product_id: ProductId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReplenishedData {
    pub product_id: ProductId,
    pub quantity: u32,
    pub available: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAdjustedData {
    pub product_id: ProductId,
    pub previous_quantity: u32,
    pub new_quantity: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockTransferredData {
    pub product_id: ProductId,
    pub quantity: u32,
    pub from_location: String,
    pub to_location: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_failure_payload_shape() {
        let event = InventoryEvent::StockReservationFailed(StockReservationFailedData {
            order_id: AggregateId::new(),
            failure_stage: FailureStage::StockReservation,
            reason: "insufficient stock".into(),
            unavailable_items: vec![UnavailableItem {
                product_id: "SKU-1".into(),
                requested: 3,
                available: 1,
            }],
            failed_at: Utc::now(),
        });
        let payload = event.to_payload().unwrap();
        assert_eq!(payload["unavailableItems"][0]["productId"], "SKU-1");
        assert_eq!(payload["unavailableItems"][0]["available"], 1);
        assert_eq!(payload["failureStage"], "stock_reservation");
        assert_eq!(event.subject(), "inventory.reservation_failed");
    }

    #[test]
    fn release_reason_is_snake_case() {
        assert_eq!(
            serde_json::to_value(ReleaseReason::PaymentFailed).unwrap(),
            serde_json::json!("payment_failed")
        );
        assert_eq!(ReleaseReason::OrderCancelled.as_str(), "order_cancelled");
    }
}
