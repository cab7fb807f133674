//! Dispatch of inbound envelopes onto the typed event catalogue.

use messaging::EventEnvelope;

use crate::aggregate::DomainEvent;
use crate::error::{DomainError, Result};
use crate::inventory::InventoryEvent;
use crate::order::OrderEvent;
use crate::payment::PaymentEvent;

/// Any event a saga participant may receive.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogueEvent {
    Order(OrderEvent),
    Payment(PaymentEvent),
    Inventory(InventoryEvent),
}

impl CatalogueEvent {
    /// Decodes an envelope by its `event_name`.
    pub fn decode(envelope: &EventEnvelope) -> Result<Self> {
        let name = envelope.event_name.as_str();
        if OrderEvent::EVENT_NAMES.contains(&name) {
            OrderEvent::from_envelope(envelope).map(CatalogueEvent::Order)
        } else if PaymentEvent::EVENT_NAMES.contains(&name) {
            PaymentEvent::from_envelope(envelope).map(CatalogueEvent::Payment)
        } else if InventoryEvent::EVENT_NAMES.contains(&name) {
            InventoryEvent::from_envelope(envelope).map(CatalogueEvent::Inventory)
        } else {
            Err(DomainError::UnknownEvent(name.to_string()))
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            CatalogueEvent::Order(e) => e.event_name(),
            CatalogueEvent::Payment(e) => e.event_name(),
            CatalogueEvent::Inventory(e) => e.event_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use common::{AggregateId, CorrelationContext};
    use messaging::Version;

    use super::*;
    use crate::aggregate::Aggregate;
    use crate::money::Money;
    use crate::order::{CustomerId, Order, OrderItem};

    #[test]
    fn decodes_order_created_from_envelope() {
        let order = Order::create(
            CustomerId::new("c-1"),
            vec![OrderItem::new("SKU-1", 2, Money::new(5.0, "USD").unwrap()).unwrap()],
        )
        .unwrap();
        let envelope = order.pending_events()[0]
            .to_envelope(Order::aggregate_type(), &order.id(), &CorrelationContext::new())
            .unwrap();

        match CatalogueEvent::decode(&envelope).unwrap() {
            CatalogueEvent::Order(OrderEvent::OrderCreated(data)) => {
                assert_eq!(data.total_amount.amount(), 10.0);
                assert_eq!(data.items.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_name_is_an_error() {
        let envelope = EventEnvelope::builder()
            .event_name("ShipmentDispatched")
            .subject("shipping.dispatched")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Shipment")
            .event_version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap();
        assert!(matches!(
            CatalogueEvent::decode(&envelope),
            Err(DomainError::UnknownEvent(_))
        ));
    }

    #[test]
    fn malformed_payload_is_a_serialization_error() {
        let envelope = EventEnvelope::builder()
            .event_name("PaymentFailed")
            .subject("payment.failed")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Payment")
            .event_version(Version::first())
            .payload_raw(serde_json::json!({ "reason": 42 }))
            .build()
            .unwrap();
        assert!(matches!(
            CatalogueEvent::decode(&envelope),
            Err(DomainError::Serialization(_))
        ));
    }
}
