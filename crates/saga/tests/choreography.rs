//! End-to-end runs of the order saga over the in-memory broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{AggregateId, CorrelationContext};
use domain::{
    Aggregate, CustomerId, Money, Order, OrderItem, OrderStatus, Payment, PaymentStatus, ProductId,
};
use messaging::topology::standard_streams;
use messaging::{
    ConsumerWorker, EventEnvelope, EventHandler, InMemoryBroker, InMemoryDeadLetters, InMemoryOutbox,
    OutboxRelay, declare_topology,
};
use resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use saga::inventory::{DEFAULT_LOCATION, ReservationStatus};
use saga::product::{
    ItemToValidate, PRODUCT_SERVICE, ProductAvailability, ProductServiceError, ProductValidation,
    UNAVAILABLE_MESSAGE, ValidatedItem,
};
use saga::topology::{DeliverySettings, saga_consumers};
use saga::{
    InMemoryPaymentGateway, InMemoryProcessedEvents, InMemoryRepository, InventoryReactor,
    OrderCommandService, OrderReactor, PaymentReactor, ProductCatalog, ProductServiceAdapter,
    Repository, SagaHandler, StockLedger,
};

/// Product service stand-in that knows every product, until switched off.
#[derive(Default)]
struct SwitchableCatalog {
    down: AtomicBool,
}

#[async_trait]
impl ProductCatalog for SwitchableCatalog {
    async fn validate_items(&self, items: &[ItemToValidate]) -> Result<ProductValidation, ProductServiceError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ProductServiceError::Status { status: 503 });
        }
        Ok(ProductValidation {
            valid: true,
            items: items
                .iter()
                .map(|item| ValidatedItem {
                    product_id: item.product_id.clone(),
                    available: true,
                    current_price: None,
                    stock: item.quantity,
                    artisan_id: None,
                    error: None,
                })
                .collect(),
            errors: None,
        })
    }

    async fn availability(&self, product_id: &ProductId) -> Result<ProductAvailability, ProductServiceError> {
        Ok(ProductAvailability {
            available: true,
            ..ProductAvailability::unknown(product_id)
        })
    }

    async fn ping(&self) -> Result<(), ProductServiceError> {
        Ok(())
    }
}

type Worker = ConsumerWorker<InMemoryBroker, dyn EventHandler>;

struct TestHarness {
    orders: Arc<InMemoryRepository<Order>>,
    payments: Arc<InMemoryRepository<Payment>>,
    ledger: Arc<StockLedger>,
    gateway: InMemoryPaymentGateway,
    catalog: Arc<SwitchableCatalog>,
    dead_letters: Arc<InMemoryDeadLetters>,
    outbox: Arc<InMemoryOutbox>,
    service: OrderCommandService,
    relay: OutboxRelay<InMemoryOutbox, InMemoryBroker>,
    workers: Vec<Worker>,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false)
}

impl TestHarness {
    async fn new() -> Self {
        let outbox = Arc::new(InMemoryOutbox::new());
        let dead_letters = Arc::new(InMemoryDeadLetters::new());
        let broker = Arc::new(InMemoryBroker::new(dead_letters.clone()));

        let settings = DeliverySettings {
            nak_delay: Duration::ZERO,
            ..DeliverySettings::default()
        };
        let consumers = saga_consumers(&settings);
        declare_topology(broker.as_ref(), standard_streams(), consumers.clone())
            .await
            .unwrap();

        let orders = Arc::new(InMemoryRepository::<Order>::new(outbox.clone()));
        let payments = Arc::new(InMemoryRepository::<Payment>::new(outbox.clone()));
        let ledger = Arc::new(StockLedger::new(outbox.clone()));
        let gateway = InMemoryPaymentGateway::new();
        let catalog = Arc::new(SwitchableCatalog::default());
        let breaker = Arc::new(CircuitBreaker::new(PRODUCT_SERVICE, CircuitBreakerConfig::default()));
        let products = Arc::new(ProductServiceAdapter::new(catalog.clone(), breaker).with_retry(fast_retry()));

        let order_handler: Arc<dyn EventHandler> = Arc::new(SagaHandler::new(
            OrderReactor::new(orders.clone()),
            Arc::new(InMemoryProcessedEvents::new()),
        ));
        let inventory_handler: Arc<dyn EventHandler> = Arc::new(SagaHandler::new(
            InventoryReactor::new(ledger.clone(), products),
            Arc::new(InMemoryProcessedEvents::new()),
        ));
        let payment_handler: Arc<dyn EventHandler> = Arc::new(SagaHandler::new(
            PaymentReactor::new(payments.clone(), Arc::new(gateway.clone())).with_retry(fast_retry()),
            Arc::new(InMemoryProcessedEvents::new()),
        ));

        let workers = consumers
            .iter()
            .map(|consumer| {
                let handler = if consumer.durable_name.starts_with("order-service") {
                    order_handler.clone()
                } else if consumer.durable_name.starts_with("inventory-service") {
                    inventory_handler.clone()
                } else {
                    payment_handler.clone()
                };
                Worker::new(broker.clone(), handler, consumer.durable_name.clone())
            })
            .collect();

        Self {
            service: OrderCommandService::new(orders.clone()),
            relay: OutboxRelay::new(outbox.clone(), broker, RetryPolicy::none()),
            outbox,
            orders,
            payments,
            ledger,
            gateway,
            catalog,
            dead_letters,
            workers,
        }
    }

    async fn stock(&self, sku: &str, quantity: u32) {
        self.ledger
            .replenish(&ProductId::new(sku), DEFAULT_LOCATION, quantity, &CorrelationContext::new())
            .await
            .unwrap();
    }

    async fn place(&self, sku: &str, quantity: u32) -> AggregateId {
        self.place_priced(sku, quantity, Money::new(15.0, "USD").unwrap()).await
    }

    async fn place_priced(&self, sku: &str, quantity: u32, unit_price: Money) -> AggregateId {
        let items = vec![OrderItem::new(sku, quantity, unit_price).unwrap()];
        let order = self
            .service
            .place_order(CustomerId::new("c-42"), items, &CorrelationContext::new())
            .await
            .unwrap();
        order.id()
    }

    /// Relays and consumes until no service has anything left to do.
    async fn settle(&self) {
        for _ in 0..50 {
            let mut progress = self.relay.relay_once().await.unwrap();
            for worker in &self.workers {
                progress += worker.poll_once().await.unwrap();
            }
            if progress == 0 {
                return;
            }
        }
        panic!("saga did not settle");
    }

    async fn order(&self, id: AggregateId) -> Order {
        self.orders.load(id).await.unwrap().unwrap()
    }

    /// Every event any service emitted about `order_id`, in emission order.
    async fn trail(&self, order_id: AggregateId) -> Vec<EventEnvelope> {
        let order_id = order_id.to_string();
        self.outbox
            .all()
            .await
            .into_iter()
            .filter(|e| e.aggregate_id == order_id || e.payload["orderId"] == order_id.as_str())
            .collect()
    }

    async fn payment_for(&self, order_id: AggregateId) -> Option<Payment> {
        self.payments
            .find(&move |p: &Payment| p.order_id() == order_id)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn paid_order_is_confirmed_and_stock_committed() {
    let harness = TestHarness::new().await;
    harness.stock("SKU-1", 50).await;

    let order_id = harness.place("SKU-1", 2).await;
    harness.settle().await;

    assert_eq!(harness.order(order_id).await.status(), OrderStatus::Confirmed);

    let payment = harness.payment_for(order_id).await.unwrap();
    assert_eq!(payment.status(), PaymentStatus::Succeeded);
    assert_eq!(payment.amount(), &Money::new(30.0, "USD").unwrap());
    assert_eq!(harness.gateway.charge_count().await, 1);

    let reservation = harness.ledger.reservation(order_id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Committed);
    let sku = ProductId::new("SKU-1");
    assert_eq!(harness.ledger.on_hand(&sku).await, 48);
    assert_eq!(harness.ledger.available(&sku).await, 48);
    assert!(harness.dead_letters.is_empty().await);
}

fn position(trail: &[EventEnvelope], event_name: &str) -> usize {
    trail
        .iter()
        .position(|e| e.event_name == event_name)
        .unwrap_or_else(|| panic!("{event_name} missing from {:?}", names(trail)))
}

fn names(trail: &[EventEnvelope]) -> Vec<&str> {
    trail.iter().map(|e| e.event_name.as_str()).collect()
}

#[tokio::test]
async fn two_of_a_at_ten_euros_confirms_at_twenty() {
    let harness = TestHarness::new().await;
    harness.stock("A", 10).await;

    let order_id = harness.place_priced("A", 2, Money::new(10.0, "EUR").unwrap()).await;
    harness.settle().await;

    let order = harness.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Confirmed);
    assert_eq!(order.total_amount(), &Money::new(20.0, "EUR").unwrap());

    let trail = harness.trail(order_id).await;
    let created = position(&trail, "OrderCreated");
    let reserved = position(&trail, "StockReserved");
    let paid = position(&trail, "PaymentSucceeded");
    let confirmed = position(&trail, "OrderConfirmed");
    assert!(created < reserved && reserved < paid && paid < confirmed, "{:?}", names(&trail));
    assert_eq!(trail[created].payload["totalAmount"]["amount"], 20.0);
    assert_eq!(trail[created].payload["totalAmount"]["currency"], "EUR");
}

#[tokio::test]
async fn declined_payment_fails_order_and_releases_stock() {
    let harness = TestHarness::new().await;
    harness.stock("A", 10).await;
    harness.gateway.set_decline(Some("card_declined")).await;

    let order_id = harness.place_priced("A", 2, Money::new(10.0, "EUR").unwrap()).await;
    harness.settle().await;

    let order = harness.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Failed);
    assert_eq!(order.failure_reason(), Some("card_declined"));
    assert_eq!(
        harness.payment_for(order_id).await.unwrap().status(),
        PaymentStatus::Failed
    );

    let trail = harness.trail(order_id).await;
    let payment_failed = position(&trail, "PaymentFailed");
    let order_failed = position(&trail, "OrderFailed");
    let released = position(&trail, "StockReleased");
    assert!(payment_failed < order_failed && order_failed < released, "{:?}", names(&trail));
    assert_eq!(trail[payment_failed].payload["reason"], "card_declined");
    assert_eq!(trail[order_failed].payload["failureStage"], "payment_processing");
    assert_eq!(trail[order_failed].payload["compensationRequired"], true);
    assert_eq!(trail[released].payload["reason"], "payment_failed");

    let reservation = harness.ledger.reservation(order_id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Released);
    assert_eq!(harness.ledger.available(&ProductId::new("A")).await, 10);
}

#[tokio::test]
async fn short_stock_fails_order_without_charging() {
    let harness = TestHarness::new().await;
    harness.stock("SKU-1", 1).await;

    let order_id = harness.place("SKU-1", 2).await;
    harness.settle().await;

    let order = harness.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Failed);
    assert!(order.failure_reason().unwrap().contains("Insufficient stock"));
    assert!(harness.payment_for(order_id).await.is_none());
    assert_eq!(harness.gateway.charge_count().await, 0);
    assert_eq!(harness.ledger.available(&ProductId::new("SKU-1")).await, 1);
}

#[tokio::test]
async fn product_service_outage_fails_order_at_inventory_check() {
    let harness = TestHarness::new().await;
    harness.stock("SKU-1", 50).await;
    harness.catalog.down.store(true, Ordering::SeqCst);

    let order_id = harness.place("SKU-1", 2).await;
    harness.settle().await;

    let order = harness.order(order_id).await;
    assert_eq!(order.status(), OrderStatus::Failed);
    assert_eq!(order.failure_reason(), Some(UNAVAILABLE_MESSAGE));
    assert!(harness.ledger.reservation(order_id).await.is_none());
    assert_eq!(harness.ledger.available(&ProductId::new("SKU-1")).await, 50);
    assert_eq!(harness.gateway.charge_count().await, 0);
}

#[tokio::test]
async fn cancelling_confirmed_order_refunds_and_restocks() {
    let harness = TestHarness::new().await;
    harness.stock("SKU-1", 50).await;

    let order_id = harness.place("SKU-1", 4).await;
    harness.settle().await;
    assert_eq!(harness.order(order_id).await.status(), OrderStatus::Confirmed);

    harness
        .service
        .cancel_order(order_id, "customer request", &CorrelationContext::new())
        .await
        .unwrap();
    harness.settle().await;

    assert_eq!(harness.order(order_id).await.status(), OrderStatus::Cancelled);
    assert_eq!(
        harness.payment_for(order_id).await.unwrap().status(),
        PaymentStatus::Refunded
    );
    assert_eq!(harness.gateway.refunds().await.len(), 1);

    let sku = ProductId::new("SKU-1");
    assert_eq!(harness.ledger.on_hand(&sku).await, 50);
    assert_eq!(harness.ledger.available(&sku).await, 50);
}

#[tokio::test]
async fn processor_outage_is_retried_before_success() {
    let harness = TestHarness::new().await;
    harness.stock("SKU-1", 50).await;
    harness.gateway.fail_next(2).await;

    let order_id = harness.place("SKU-1", 1).await;
    harness.settle().await;

    assert_eq!(harness.order(order_id).await.status(), OrderStatus::Confirmed);
    assert_eq!(harness.gateway.attempts().await, 3);
    assert_eq!(harness.gateway.charge_count().await, 1);
}
