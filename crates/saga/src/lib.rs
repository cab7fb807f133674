//! Choreographed order saga.
//!
//! Three services cooperate through events only:
//!
//! ```text
//! order.created ──▶ inventory: validate products, reserve stock
//!                      ├─ inventory.reserved ──▶ payment: charge
//!                      │                          ├─ payment.succeeded ──▶ order: CONFIRMED ──▶ inventory: commit
//!                      │                          └─ payment.failed    ──▶ order: FAILED    ──▶ inventory: release
//!                      └─ inventory.reservation_failed ──▶ order: FAILED
//! ```
//!
//! Every state change is saved together with its outgoing events through
//! the outbox, and every consumer is idempotent.

pub mod error;
pub mod gateway;
pub mod handlers;
pub mod idempotency;
pub mod inventory;
pub mod order_service;
pub mod product;
pub mod repository;
pub mod topology;
pub mod webhook;

pub use error::{Result, SagaError};
pub use gateway::{ChargeOutcome, ChargeRequest, GatewayError, InMemoryPaymentGateway, PaymentGateway};
pub use handlers::{InventoryReactor, OrderReactor, PaymentReactor, Reactor, SagaHandler};
pub use idempotency::{InMemoryProcessedEvents, ProcessedEvents};
pub use inventory::StockLedger;
pub use order_service::OrderCommandService;
pub use product::{HttpProductCatalog, ProductCatalog, ProductServiceAdapter};
pub use repository::{InMemoryRepository, Repository};
pub use topology::{DeliverySettings, saga_consumers};
pub use webhook::PaymentWebhookProcessor;
