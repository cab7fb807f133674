//! Pull-consumer workers that drive event handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::Instrument;

use crate::broker::{Broker, Delivery};
use crate::error::HandlerError;
use crate::{EventEnvelope, Result};

/// Reacts to one event. Must tolerate being called more than once for the
/// same envelope.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError>;
}

/// One member of a queue group pulling from a durable consumer.
///
/// Successful handling acks, `HandlerError::Retry` naks (redelivery up to
/// the consumer's `max_deliver`), `HandlerError::Reject` terminates the
/// message into the dead-letter path.
pub struct ConsumerWorker<B: ?Sized, H: ?Sized> {
    broker: Arc<B>,
    handler: Arc<H>,
    consumer: String,
    member: String,
    batch_size: usize,
    idle_poll: Duration,
}

impl<B, H> ConsumerWorker<B, H>
where
    B: Broker + ?Sized,
    H: EventHandler + ?Sized,
{
    pub fn new(broker: Arc<B>, handler: Arc<H>, consumer: impl Into<String>) -> Self {
        Self {
            broker,
            handler,
            consumer: consumer.into(),
            member: "0".to_string(),
            batch_size: 16,
            idle_poll: Duration::from_millis(250),
        }
    }

    /// Names this instance within the queue group (for logs).
    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.member = member.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Fetches and handles one batch. Returns the number of messages handled.
    pub async fn poll_once(&self) -> Result<usize> {
        let deliveries = self.broker.fetch(&self.consumer, self.batch_size).await?;
        let count = deliveries.len();
        for delivery in deliveries {
            self.process(delivery).await?;
        }
        Ok(count)
    }

    async fn process(&self, delivery: Delivery) -> Result<()> {
        let correlation = delivery.envelope.correlation();
        let span = tracing::info_span!(
            "consume",
            consumer = %self.consumer,
            member = %self.member,
            subject = %delivery.subject,
            event_name = %delivery.envelope.event_name,
            stream_seq = delivery.stream_seq,
            delivery_count = delivery.delivery_count,
            correlation_id = %correlation.correlation_id,
        );

        async {
            match self.handler.handle(&delivery.envelope).await {
                Ok(()) => self.broker.ack(&delivery).await,
                Err(HandlerError::Retry(reason)) => {
                    tracing::warn!(%reason, "handler failed, message will be redelivered");
                    self.broker.nak(&delivery, &reason).await
                }
                Err(HandlerError::Reject(reason)) => {
                    tracing::error!(%reason, "handler rejected message");
                    self.broker.term(&delivery, &reason).await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Runs until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(consumer = %self.consumer, member = %self.member, "consumer worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(0) => {
                    tokio::select! {
                        _ = self.broker.wait_for_messages() => {}
                        _ = tokio::time::sleep(self.idle_poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(consumer = %self.consumer, error = %e, "consumer poll failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.idle_poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        tracing::info!(consumer = %self.consumer, member = %self.member, "consumer worker stopped");
    }
}
