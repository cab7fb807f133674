//! Integration tests for the Order and Payment aggregates.

use common::{AggregateId, CorrelationContext};
use domain::{
    Aggregate, CatalogueEvent, CustomerId, DomainEvent, FailureStage, Money, Order, OrderError,
    OrderEvent, OrderItem, OrderStatus, Payment, PaymentError, PaymentEvent, PaymentStatus,
};
use messaging::Version;

fn usd(amount: f64) -> Money {
    Money::new(amount, "USD").unwrap()
}

fn item(sku: &str, quantity: u32, price: f64) -> OrderItem {
    OrderItem::new(sku, quantity, usd(price)).unwrap()
}

mod order_lifecycle {
    use super::*;

    #[test]
    fn total_tracks_every_item_change() {
        let mut order = Order::create(CustomerId::new("c-1"), vec![item("A", 3, 15.5)]).unwrap();
        order.add_item(item("B", 2, 25.0)).unwrap();
        assert_eq!(order.total_amount(), &usd(96.5));

        order.add_item(item("A", 1, 15.5)).unwrap();
        assert_eq!(order.total_amount(), &usd(112.0));

        order.remove_item(&"B".into()).unwrap();
        assert_eq!(order.total_amount(), &usd(62.0));

        let sum = order
            .items()
            .iter()
            .map(|i| i.total_price().unwrap().amount())
            .sum::<f64>();
        assert_eq!(order.total_amount().amount(), sum);
    }

    #[test]
    fn mixed_currency_order_is_rejected() {
        let err = Order::create(
            CustomerId::new("c-1"),
            vec![
                item("A", 1, 10.0),
                OrderItem::new("B", 1, Money::new(10.0, "EUR").unwrap()).unwrap(),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::CurrencyMismatch { .. }));
    }

    #[test]
    fn full_happy_lifecycle_emits_ordered_versions() {
        let mut order = Order::create(CustomerId::new("c-1"), vec![item("A", 1, 10.0)]).unwrap();
        order.confirm().unwrap();
        order.mark_as_shipped().unwrap();
        order.mark_as_delivered().unwrap();

        let events = order.take_pending_events();
        let versions: Vec<u64> = events.iter().map(|e| e.version.as_u64()).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(order.status(), OrderStatus::Delivered);
    }

    #[test]
    fn illegal_moves_report_both_statuses() {
        let mut order = Order::create(CustomerId::new("c-1"), vec![item("A", 1, 10.0)]).unwrap();
        let err = order.mark_as_delivered().unwrap_err();
        assert_eq!(err.to_string(), "Invalid transition: PENDING -> DELIVERED");

        order
            .mark_as_failed("out of stock", FailureStage::StockReservation, false)
            .unwrap();
        assert!(matches!(
            order.cancel("customer request"),
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Failed,
                to: OrderStatus::Cancelled
            })
        ));
    }
}

mod payment_lifecycle {
    use super::*;

    fn payment() -> Payment {
        Payment::create(AggregateId::new(), CustomerId::new("c-1"), usd(40.0)).unwrap()
    }

    #[test]
    fn repeated_success_with_same_charge_is_silent() {
        let mut p = payment();
        p.process().unwrap();
        p.mark_as_succeeded("ch_1").unwrap();
        let before = p.pending_events().len();

        p.mark_as_succeeded("ch_1").unwrap();
        assert_eq!(p.pending_events().len(), before);
        assert!(matches!(
            p.mark_as_succeeded("ch_other"),
            Err(PaymentError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn refund_requires_success() {
        let mut p = payment();
        assert!(p.refund(None).is_err());
        p.process().unwrap();
        p.mark_as_failed("declined").unwrap();
        assert!(p.refund(None).is_err());
        assert_eq!(p.status(), PaymentStatus::Failed);
    }

    #[test]
    fn payment_events_point_at_the_order() {
        let order_id = AggregateId::new();
        let mut p = Payment::create(order_id, CustomerId::new("c-1"), usd(5.0)).unwrap();
        p.process().unwrap();
        assert!(p.pending_events().iter().all(|r| r.event.order_id() == order_id));
    }
}

mod wire_format {
    use super::*;

    #[test]
    fn envelopes_decode_back_through_the_catalogue() {
        let mut order = Order::create(CustomerId::new("c-1"), vec![item("A", 2, 3.0)]).unwrap();
        order.confirm().unwrap();
        let ctx = CorrelationContext::new();

        for recorded in order.pending_events() {
            let envelope = recorded
                .to_envelope(Order::aggregate_type(), &order.id(), &ctx)
                .unwrap();
            assert_eq!(envelope.aggregate_type, "Order");
            let decoded = CatalogueEvent::decode(&envelope).unwrap();
            assert_eq!(decoded, CatalogueEvent::Order(recorded.event.clone()));
        }
    }

    #[test]
    fn payment_succeeded_payload_uses_camel_case() {
        let mut p = Payment::create(AggregateId::new(), CustomerId::new("c-1"), usd(9.0)).unwrap();
        p.process().unwrap();
        p.mark_as_succeeded("ch_42").unwrap();

        let recorded = p.pending_events().last().unwrap();
        assert_eq!(recorded.version, Version::new(3));
        let payload = recorded.event.to_payload().unwrap();
        assert_eq!(payload["externalChargeId"], "ch_42");
        assert!(payload.get("orderId").is_some());
        assert!(matches!(recorded.event, PaymentEvent::PaymentSucceeded(_)));
    }

    #[test]
    fn order_created_carries_items_for_downstream_services() {
        let order = Order::create(CustomerId::new("c-1"), vec![item("A", 2, 3.0)]).unwrap();
        match &order.pending_events()[0].event {
            OrderEvent::OrderCreated(data) => {
                assert_eq!(data.items[0].quantity, 2);
                assert_eq!(data.customer_id.as_str(), "c-1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
