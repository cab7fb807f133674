//! Wires the broker, the three services and their background tasks.

use std::sync::Arc;
use std::time::Duration;

use domain::{Order, Payment};
use messaging::topology::standard_streams;
use messaging::{
    ConsumerConfig, ConsumerWorker, EventHandler, InMemoryBroker, InMemoryDeadLetters, InMemoryOutbox,
    OutboxRelay, declare_topology,
};
use resilience::{CircuitBreakerRegistry, RetryPolicy};
use saga::handlers::{inventory, order, payment};
use saga::product::PRODUCT_SERVICE;
use saga::topology::saga_consumers;
use saga::{
    InMemoryPaymentGateway, InMemoryProcessedEvents, InMemoryRepository, InventoryReactor,
    OrderCommandService, OrderReactor, PaymentReactor, PaymentWebhookProcessor, ProductCatalog,
    ProductServiceAdapter, Repository, SagaHandler, StockLedger,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::Result;

const RELAY_INTERVAL: Duration = Duration::from_millis(100);
const EXPIRY_INTERVAL: Duration = Duration::from_secs(30);

/// Outbox and handler of one service.
struct Service {
    name: &'static str,
    outbox: Arc<InMemoryOutbox>,
    handler: Arc<dyn EventHandler>,
}

/// Everything one node runs. Each service writes to its own outbox.
pub struct Runtime {
    pub broker: Arc<InMemoryBroker>,
    pub dead_letters: Arc<InMemoryDeadLetters>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub orders: Arc<OrderCommandService>,
    pub payments: Arc<dyn Repository<Payment>>,
    pub ledger: Arc<StockLedger>,
    pub products: Arc<ProductServiceAdapter>,
    pub webhooks: Arc<PaymentWebhookProcessor>,
    consumers: Vec<ConsumerConfig>,
    services: Vec<Service>,
    retry: RetryPolicy,
    instance_id: String,
    consumer_instances: usize,
}

impl Runtime {
    /// Declares the topology and builds the services around `catalog`.
    pub async fn build(config: &Config, catalog: Arc<dyn ProductCatalog>) -> Result<Self> {
        let dead_letters = Arc::new(InMemoryDeadLetters::new());
        let broker = Arc::new(InMemoryBroker::new(dead_letters.clone()));
        let consumers = saga_consumers(&config.delivery_settings());
        declare_topology(broker.as_ref(), standard_streams(), consumers.clone()).await?;

        let retry = config.retry_policy();
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker_config()));
        let products = Arc::new(
            ProductServiceAdapter::new(catalog, breakers.get_or_create(PRODUCT_SERVICE)).with_retry(retry.clone()),
        );

        let order_outbox = Arc::new(InMemoryOutbox::new());
        let order_repo = Arc::new(InMemoryRepository::<Order>::new(order_outbox.clone()));

        let inventory_outbox = Arc::new(InMemoryOutbox::new());
        let ledger = Arc::new(StockLedger::new(inventory_outbox.clone()));

        let payment_outbox = Arc::new(InMemoryOutbox::new());
        let payment_repo = Arc::new(InMemoryRepository::<Payment>::new(payment_outbox.clone()));
        let gateway = Arc::new(InMemoryPaymentGateway::new());

        let services = vec![
            Service {
                name: order::SERVICE,
                outbox: order_outbox,
                handler: Arc::new(SagaHandler::new(
                    OrderReactor::new(order_repo.clone()),
                    Arc::new(InMemoryProcessedEvents::new()),
                )),
            },
            Service {
                name: inventory::SERVICE,
                outbox: inventory_outbox,
                handler: Arc::new(SagaHandler::new(
                    InventoryReactor::new(ledger.clone(), products.clone()),
                    Arc::new(InMemoryProcessedEvents::new()),
                )),
            },
            Service {
                name: payment::SERVICE,
                outbox: payment_outbox,
                handler: Arc::new(SagaHandler::new(
                    PaymentReactor::new(payment_repo.clone(), gateway).with_retry(retry.clone()),
                    Arc::new(InMemoryProcessedEvents::new()),
                )),
            },
        ];

        tracing::info!(
            consumers = consumers.len(),
            instances = config.consumer_instances,
            "saga topology declared"
        );

        Ok(Self {
            broker,
            dead_letters,
            breakers,
            orders: Arc::new(OrderCommandService::new(order_repo)),
            payments: payment_repo.clone(),
            ledger,
            products,
            webhooks: Arc::new(PaymentWebhookProcessor::new(payment_repo, config.webhook_secret.clone())),
            consumers,
            services,
            retry,
            instance_id: config.instance_id.clone(),
            consumer_instances: config.consumer_instances.max(1),
        })
    }

    /// Spawns the consumer workers, outbox relays and reservation expiry.
    /// Every task stops once `shutdown` flips to true.
    pub fn spawn(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        for consumer in &self.consumers {
            let Some(service) = self.services.iter().find(|s| consumer.queue_group.starts_with(s.name)) else {
                tracing::warn!(consumer = %consumer.durable_name, "no service for consumer");
                continue;
            };
            for member in 0..self.consumer_instances {
                let worker = ConsumerWorker::new(self.broker.clone(), service.handler.clone(), &consumer.durable_name)
                    .with_member(format!("{}-{member}", self.instance_id));
                tasks.push(tokio::spawn(worker.run(shutdown.clone())));
            }
        }

        for service in &self.services {
            let relay = OutboxRelay::new(service.outbox.clone(), self.broker.clone(), self.retry.clone());
            tasks.push(tokio::spawn(relay.run(RELAY_INTERVAL, shutdown.clone())));
        }

        tasks.push(tokio::spawn(self.ledger.clone().run_expiry(EXPIRY_INTERVAL, shutdown.clone())));
        tasks
    }
}
