//! Transactional outbox: events are stored alongside the state change that
//! produced them and relayed to the broker afterwards, at least once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resilience::RetryPolicy;
use tokio::sync::{RwLock, watch};

use crate::broker::EventPublisher;
use crate::{EventEnvelope, EventId, Result};

#[async_trait]
pub trait Outbox: Send + Sync {
    async fn enqueue(&self, envelopes: Vec<EventEnvelope>) -> Result<()>;

    /// Oldest unpublished envelopes first.
    async fn unpublished(&self, limit: usize) -> Result<Vec<EventEnvelope>>;

    async fn mark_published(&self, event_id: EventId) -> Result<()>;
}

#[derive(Debug, Clone)]
struct OutboxEntry {
    envelope: EventEnvelope,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryOutbox {
    entries: Arc<RwLock<Vec<OutboxEntry>>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every envelope ever enqueued, in order.
    pub async fn all(&self) -> Vec<EventEnvelope> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| e.envelope.clone())
            .collect()
    }

    pub async fn unpublished_count(&self) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.published_at.is_none())
            .count()
    }
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn enqueue(&self, envelopes: Vec<EventEnvelope>) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.extend(envelopes.into_iter().map(|envelope| OutboxEntry {
            envelope,
            published_at: None,
        }));
        Ok(())
    }

    async fn unpublished(&self, limit: usize) -> Result<Vec<EventEnvelope>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.published_at.is_none())
            .take(limit)
            .map(|e| e.envelope.clone())
            .collect())
    }

    async fn mark_published(&self, event_id: EventId) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.envelope.event_id == event_id)
        {
            entry.published_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }
}

/// Moves outbox entries onto the broker.
///
/// Entries are published in enqueue order; the relay stops at the first
/// entry it cannot publish so later events never overtake it.
pub struct OutboxRelay<O: ?Sized, P: ?Sized> {
    outbox: Arc<O>,
    publisher: Arc<P>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl<O, P> OutboxRelay<O, P>
where
    O: Outbox + ?Sized,
    P: EventPublisher + ?Sized,
{
    pub fn new(outbox: Arc<O>, publisher: Arc<P>, retry: RetryPolicy) -> Self {
        Self {
            outbox,
            publisher,
            retry,
            batch_size: 64,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Publishes one batch. Returns how many entries were published.
    pub async fn relay_once(&self) -> Result<usize> {
        let pending = self.outbox.unpublished(self.batch_size).await?;
        let mut published = 0;

        for envelope in pending {
            let event_id = envelope.event_id;
            let publisher = &self.publisher;
            let outcome = self
                .retry
                .execute(|_| {
                    let envelope = envelope.clone();
                    async move { publisher.publish(envelope).await }
                })
                .await;

            match outcome {
                Ok(ack) => {
                    tracing::debug!(
                        %event_id,
                        event_name = %envelope.event_name,
                        stream = %ack.stream,
                        sequence = ack.sequence,
                        duplicate = ack.duplicate,
                        "outbox entry published"
                    );
                    self.outbox.mark_published(event_id).await?;
                    published += 1;
                }
                Err(e) => {
                    tracing::warn!(%event_id, error = %e, "outbox relay halted");
                    return Err(e.into_inner());
                }
            }
        }

        Ok(published)
    }

    /// Relays on a fixed interval until `shutdown` flips to true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.relay_once().await {
                        tracing::error!(error = %e, "outbox relay pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        // Final drain so committed events are not stranded on shutdown.
        if let Err(e) = self.relay_once().await {
            tracing::error!(error = %e, "final outbox drain failed");
        }
    }
}
