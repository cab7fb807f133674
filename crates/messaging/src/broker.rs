use async_trait::async_trait;

use crate::topology::{ConsumerConfig, StreamConfig};
use crate::{EventEnvelope, Result};

/// Broker acknowledgement of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    /// True when the event id was already stored inside the duplicate window.
    pub duplicate: bool,
}

/// One delivery of a stored message to a consumer.
///
/// The handle must be acked, nak'ed or terminated through the broker that
/// produced it; otherwise it is redelivered after the consumer's ack wait.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub consumer: String,
    pub stream: String,
    pub stream_seq: u64,
    pub subject: String,
    /// 1 on first delivery.
    pub delivery_count: u32,
    pub envelope: EventEnvelope,
}

/// Publish side of the event bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<PublishAck>;
}

/// Durable, at-least-once broker with pull consumers.
#[async_trait]
pub trait Broker: EventPublisher {
    /// Creates a stream, or does nothing if an identical one exists.
    async fn add_stream(&self, config: StreamConfig) -> Result<()>;

    /// Creates a durable consumer, or does nothing if it already exists.
    async fn add_consumer(&self, config: ConsumerConfig) -> Result<()>;

    /// Pulls up to `batch` messages for the durable consumer.
    ///
    /// Callers sharing a durable name form a queue group: each message is
    /// handed to only one of them at a time.
    async fn fetch(&self, consumer: &str, batch: usize) -> Result<Vec<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Negative ack; redelivers unless the delivery bound is reached.
    async fn nak(&self, delivery: &Delivery, error: &str) -> Result<()>;

    /// Terminates redelivery and dead-letters the message.
    async fn term(&self, delivery: &Delivery, error: &str) -> Result<()>;

    /// Resolves when new messages may be available.
    async fn wait_for_messages(&self);
}

/// Declares streams then consumers. Safe to call on every startup.
pub async fn declare_topology<B: Broker + ?Sized>(
    broker: &B,
    streams: Vec<StreamConfig>,
    consumers: Vec<ConsumerConfig>,
) -> Result<()> {
    for stream in streams {
        broker.add_stream(stream).await?;
    }
    for consumer in consumers {
        broker.add_consumer(consumer).await?;
    }
    Ok(())
}
