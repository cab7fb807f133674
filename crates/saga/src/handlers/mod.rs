//! Event reactions of the three saga participants.
//!
//! Each service implements [`Reactor`]; [`SagaHandler`] adapts a reactor to
//! the broker's [`EventHandler`], adding decoding, deduplication, metrics
//! and the mapping of failures onto retry or dead-letter.

pub mod inventory;
pub mod order;
pub mod payment;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{AggregateId, CorrelationContext};
use domain::CatalogueEvent;
use messaging::{EventEnvelope, EventHandler, HandlerError};
use tracing::Instrument;

use crate::error::{Result, SagaError};
use crate::idempotency::{DedupeKey, ProcessedEvents};

pub use inventory::InventoryReactor;
pub use order::OrderReactor;
pub use payment::PaymentReactor;

/// One service's reaction to inbound events.
#[async_trait]
pub trait Reactor: Send + Sync {
    /// Service name used in logs and metric labels.
    fn service(&self) -> &'static str;

    /// Reacts to a decoded event. `ctx` is already derived from the inbound
    /// envelope, so anything recorded with it is caused by that event.
    async fn react(&self, event: CatalogueEvent, envelope: &EventEnvelope, ctx: &CorrelationContext) -> Result<()>;
}

/// Broker-facing wrapper around a [`Reactor`].
pub struct SagaHandler<R> {
    reactor: R,
    processed: Arc<dyn ProcessedEvents>,
}

impl<R: Reactor> SagaHandler<R> {
    pub fn new(reactor: R, processed: Arc<dyn ProcessedEvents>) -> Self {
        Self { reactor, processed }
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }
}

#[async_trait]
impl<R: Reactor> EventHandler for SagaHandler<R> {
    async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError> {
        let service = self.reactor.service();
        let key = DedupeKey::of(envelope);

        if self.processed.is_processed(&key).await {
            tracing::debug!(
                service,
                event_name = %envelope.event_name,
                aggregate_id = %envelope.aggregate_id,
                version = %envelope.event_version,
                "duplicate event skipped"
            );
            metrics::counter!("saga_events_duplicate_total", "service" => service).increment(1);
            return Ok(());
        }

        let event = CatalogueEvent::decode(envelope).map_err(|e| {
            tracing::error!(service, event_name = %envelope.event_name, error = %e, "undecodable event");
            HandlerError::Reject(e.to_string())
        })?;

        let ctx = envelope.correlation().caused_by(envelope.event_id.to_string());
        let span = tracing::info_span!(
            "react",
            service,
            event_name = %envelope.event_name,
            aggregate_id = %envelope.aggregate_id,
            correlation_id = %ctx.correlation_id,
        );

        let started = Instant::now();
        let result = self
            .reactor
            .react(event, envelope, &ctx)
            .instrument(span)
            .await;
        metrics::histogram!("saga_handler_duration_seconds", "service" => service)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                self.processed.mark_processed(key).await;
                metrics::counter!(
                    "saga_events_handled_total",
                    "service" => service,
                    "event" => envelope.event_name.clone()
                )
                .increment(1);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    service,
                    event_name = %envelope.event_name,
                    transient = error.is_transient(),
                    error = %error,
                    "event handling failed"
                );
                Err(error.into())
            }
        }
    }
}

/// The order id an order-stream envelope is about.
pub(crate) fn order_id_of(envelope: &EventEnvelope) -> Result<AggregateId> {
    envelope
        .aggregate_id
        .parse()
        .map_err(|_| SagaError::Validation(format!("aggregate id {} is not an order id", envelope.aggregate_id)))
}
