//! Event transport for the order saga.
//!
//! This crate provides:
//! - `EventEnvelope`, the wire form of every cross-service event
//! - stream and durable-consumer topology with queue groups
//! - an in-memory at-least-once broker with explicit acknowledgment
//! - consumer workers, a dead-letter path and a transactional outbox

pub mod broker;
pub mod consumer;
pub mod dead_letter;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod outbox;
pub mod topology;

pub use broker::{Broker, Delivery, EventPublisher, PublishAck, declare_topology};
pub use consumer::{ConsumerWorker, EventHandler};
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetters};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use error::{HandlerError, MessagingError, Result};
pub use memory::InMemoryBroker;
pub use outbox::{InMemoryOutbox, Outbox, OutboxRelay};
pub use topology::{ConsumerConfig, Retention, StreamConfig};
