use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::broker::{Broker, Delivery, EventPublisher, PublishAck};
use crate::dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetters};
use crate::topology::{ConsumerConfig, Retention, StreamConfig, dead_letter_subject, patterns_overlap};
use crate::{EventEnvelope, EventId, MessagingError, Result};

/// In-process broker with stream/consumer semantics.
///
/// Streams store messages by sequence number. Each durable consumer keeps
/// its own cursor, in-flight set and delivery counts, so several services
/// can consume the same stream independently while instances of one
/// service share a consumer as a queue group.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    dead_letters: Arc<dyn DeadLetterSink>,
}

#[derive(Default)]
struct BrokerState {
    streams: BTreeMap<String, StreamState>,
    consumers: HashMap<String, ConsumerState>,
}

struct StoredMessage {
    subject: String,
    envelope: EventEnvelope,
    stored_at: DateTime<Utc>,
    acked_by: HashSet<String>,
}

struct StreamState {
    config: StreamConfig,
    messages: BTreeMap<u64, StoredMessage>,
    last_seq: u64,
    recent_ids: HashMap<EventId, (u64, DateTime<Utc>)>,
}

struct ConsumerState {
    config: ConsumerConfig,
    delivered_seq: u64,
    in_flight: HashMap<u64, Instant>,
    redeliver: BTreeMap<u64, Instant>,
    delivery_counts: HashMap<u64, u32>,
}

impl StreamState {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            messages: BTreeMap::new(),
            last_seq: 0,
            recent_ids: HashMap::new(),
        }
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let max_age = to_chrono(self.config.max_age);
        self.messages.retain(|_, m| now - m.stored_at < max_age);

        let window = to_chrono(self.config.duplicate_window);
        self.recent_ids.retain(|_, (_, at)| now - *at < window);
    }
}

impl ConsumerState {
    fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            delivered_seq: 0,
            in_flight: HashMap::new(),
            redeliver: BTreeMap::new(),
            delivery_counts: HashMap::new(),
        }
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

impl InMemoryBroker {
    pub fn new(dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
            dead_letters,
        }
    }

    /// Number of messages currently retained by a stream.
    pub async fn stream_len(&self, stream: &str) -> Result<usize> {
        let state = self.state.lock().await;
        state
            .streams
            .get(stream)
            .map(|s| s.messages.len())
            .ok_or_else(|| MessagingError::StreamNotFound(stream.to_string()))
    }

    /// Messages the consumer has not yet acked: in flight, waiting for
    /// redelivery, or not yet delivered.
    pub async fn pending(&self, consumer: &str) -> Result<usize> {
        let state = self.state.lock().await;
        let c = state
            .consumers
            .get(consumer)
            .ok_or_else(|| MessagingError::ConsumerNotFound(consumer.to_string()))?;
        let undelivered = state
            .streams
            .get(&c.config.stream)
            .map(|s| {
                s.messages
                    .range(c.delivered_seq + 1..)
                    .filter(|(_, m)| c.config.accepts(&m.subject))
                    .count()
            })
            .unwrap_or(0);
        Ok(c.in_flight.len() + c.redeliver.len() + undelivered)
    }

    pub async fn consumer_config(&self, consumer: &str) -> Option<ConsumerConfig> {
        let state = self.state.lock().await;
        state.consumers.get(consumer).map(|c| c.config.clone())
    }

    async fn record_dead_letters(&self, letters: Vec<DeadLetter>) {
        for letter in letters {
            metrics::counter!("broker_messages_dead_lettered_total", "consumer" => letter.consumer.clone())
                .increment(1);
            self.dead_letters.record(letter).await;
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryDeadLetters::new()))
    }
}

/// Marks a message as done for `consumer`, dropping it from a work-queue
/// stream once every interested consumer is done with it.
fn settle(
    streams: &mut BTreeMap<String, StreamState>,
    consumers: &HashMap<String, ConsumerState>,
    consumer: &str,
    stream_name: &str,
    seq: u64,
) {
    let Some(stream) = streams.get_mut(stream_name) else {
        return;
    };
    let retention = stream.config.retention;
    let Some(message) = stream.messages.get_mut(&seq) else {
        return;
    };
    message.acked_by.insert(consumer.to_string());

    if retention == Retention::WorkQueue {
        let everyone_done = consumers
            .values()
            .filter(|c| c.config.stream == stream_name && c.config.accepts(&message.subject))
            .all(|c| message.acked_by.contains(&c.config.durable_name));
        if everyone_done {
            stream.messages.remove(&seq);
        }
    }
}

fn dead_letter(
    consumer: &ConsumerConfig,
    message: Option<&StoredMessage>,
    delivery: Option<&Delivery>,
    error: &str,
    delivery_count: u32,
) -> Option<DeadLetter> {
    let (subject, envelope) = match (message, delivery) {
        (Some(m), _) => (m.subject.clone(), m.envelope.clone()),
        (None, Some(d)) => (d.subject.clone(), d.envelope.clone()),
        (None, None) => return None,
    };
    Some(DeadLetter {
        id: Uuid::new_v4(),
        subject: dead_letter_subject(&subject),
        original_subject: subject,
        stream: consumer.stream.clone(),
        consumer: consumer.durable_name.clone(),
        envelope,
        error: error.to_string(),
        delivery_count,
        failed_at: Utc::now(),
    })
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, envelope: EventEnvelope) -> Result<PublishAck> {
        let now = Utc::now();
        let ack = {
            let mut state = self.state.lock().await;
            let stream = state
                .streams
                .values_mut()
                .find(|s| s.config.captures(&envelope.subject))
                .ok_or_else(|| MessagingError::NoStreamForSubject(envelope.subject.clone()))?;
            stream.expire(now);

            if let Some((sequence, _)) = stream.recent_ids.get(&envelope.event_id) {
                tracing::debug!(
                    event_id = %envelope.event_id,
                    stream = %stream.config.name,
                    "duplicate publish ignored"
                );
                return Ok(PublishAck {
                    stream: stream.config.name.clone(),
                    sequence: *sequence,
                    duplicate: true,
                });
            }

            stream.last_seq += 1;
            let sequence = stream.last_seq;
            stream.recent_ids.insert(envelope.event_id, (sequence, now));
            tracing::debug!(
                stream = %stream.config.name,
                subject = %envelope.subject,
                event_name = %envelope.event_name,
                sequence,
                "message stored"
            );
            stream.messages.insert(
                sequence,
                StoredMessage {
                    subject: envelope.subject.clone(),
                    envelope,
                    stored_at: now,
                    acked_by: HashSet::new(),
                },
            );

            PublishAck {
                stream: stream.config.name.clone(),
                sequence,
                duplicate: false,
            }
        };

        metrics::counter!("broker_messages_published_total", "stream" => ack.stream.clone()).increment(1);
        self.notify.notify_waiters();
        Ok(ack)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn add_stream(&self, config: StreamConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.streams.contains_key(&config.name) {
            return Ok(());
        }

        for existing in state.streams.values() {
            let overlaps = config.subjects.iter().any(|new| {
                existing
                    .config
                    .subjects
                    .iter()
                    .any(|old| patterns_overlap(new, old))
            });
            if overlaps {
                return Err(MessagingError::OverlappingSubjects {
                    stream: config.name.clone(),
                    existing: existing.config.name.clone(),
                });
            }
        }

        tracing::info!(stream = %config.name, subjects = ?config.subjects, "stream created");
        state.streams.insert(config.name.clone(), StreamState::new(config));
        Ok(())
    }

    async fn add_consumer(&self, config: ConsumerConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.streams.contains_key(&config.stream) {
            return Err(MessagingError::StreamNotFound(config.stream.clone()));
        }
        if state.consumers.contains_key(&config.durable_name) {
            return Ok(());
        }

        tracing::info!(
            consumer = %config.durable_name,
            stream = %config.stream,
            queue_group = %config.queue_group,
            filter = ?config.filter_subjects,
            "durable consumer created"
        );
        state
            .consumers
            .insert(config.durable_name.clone(), ConsumerState::new(config));
        Ok(())
    }

    async fn fetch(&self, consumer: &str, batch: usize) -> Result<Vec<Delivery>> {
        let now = Instant::now();
        let mut letters = Vec::new();
        let mut deliveries = Vec::new();

        {
            let mut guard = self.state.lock().await;
            let BrokerState { streams, consumers } = &mut *guard;

            let state = consumers
                .get_mut(consumer)
                .ok_or_else(|| MessagingError::ConsumerNotFound(consumer.to_string()))?;
            let stream_name = state.config.stream.clone();
            let stream = streams
                .get_mut(&stream_name)
                .ok_or_else(|| MessagingError::StreamNotFound(stream_name.clone()))?;
            stream.expire(Utc::now());

            // Ack wait elapsed: redeliver, or dead-letter at the bound.
            let expired: Vec<u64> = state
                .in_flight
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(seq, _)| *seq)
                .collect();
            let mut exhausted = Vec::new();
            for seq in expired {
                state.in_flight.remove(&seq);
                let count = state.delivery_counts.get(&seq).copied().unwrap_or(0);
                if count >= state.config.max_deliver {
                    exhausted.push((seq, count));
                } else {
                    metrics::counter!("broker_messages_redelivered_total", "consumer" => consumer.to_string())
                        .increment(1);
                    state.redeliver.insert(seq, now);
                }
            }
            for (seq, count) in &exhausted {
                state.delivery_counts.remove(seq);
                if let Some(letter) = dead_letter(
                    &state.config,
                    stream.messages.get(seq),
                    None,
                    "ack wait exceeded",
                    *count,
                ) {
                    letters.push(letter);
                }
            }

            let ready: Vec<u64> = state
                .redeliver
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(seq, _)| *seq)
                .take(batch)
                .collect();
            let mut candidates = Vec::with_capacity(batch);
            for seq in ready {
                state.redeliver.remove(&seq);
                if stream.messages.contains_key(&seq) {
                    candidates.push(seq);
                } else {
                    state.delivery_counts.remove(&seq);
                }
            }

            if candidates.len() < batch {
                let mut cursor = state.delivered_seq;
                for (seq, message) in stream.messages.range(state.delivered_seq + 1..) {
                    if candidates.len() >= batch {
                        break;
                    }
                    cursor = *seq;
                    if state.config.accepts(&message.subject) {
                        candidates.push(*seq);
                    }
                }
                state.delivered_seq = cursor.max(state.delivered_seq);
            }

            for seq in candidates {
                let Some(message) = stream.messages.get(&seq) else {
                    continue;
                };
                let count = state.delivery_counts.entry(seq).or_insert(0);
                *count += 1;
                state.in_flight.insert(seq, now + state.config.ack_wait);
                deliveries.push(Delivery {
                    consumer: consumer.to_string(),
                    stream: stream_name.clone(),
                    stream_seq: seq,
                    subject: message.subject.clone(),
                    delivery_count: *count,
                    envelope: message.envelope.clone(),
                });
            }

            let done: Vec<u64> = exhausted.into_iter().map(|(seq, _)| seq).collect();
            let consumers_view: &HashMap<String, ConsumerState> = consumers;
            for seq in done {
                settle(streams, consumers_view, consumer, &stream_name, seq);
            }
        }

        self.record_dead_letters(letters).await;
        Ok(deliveries)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        {
            let mut guard = self.state.lock().await;
            let BrokerState { streams, consumers } = &mut *guard;
            let state = consumers
                .get_mut(&delivery.consumer)
                .ok_or_else(|| MessagingError::ConsumerNotFound(delivery.consumer.clone()))?;

            let held = state.in_flight.remove(&delivery.stream_seq).is_some()
                || state.redeliver.remove(&delivery.stream_seq).is_some();
            if !held {
                return Err(MessagingError::NotInFlight {
                    consumer: delivery.consumer.clone(),
                    stream_seq: delivery.stream_seq,
                });
            }
            state.delivery_counts.remove(&delivery.stream_seq);

            settle(
                streams,
                consumers,
                &delivery.consumer,
                &delivery.stream,
                delivery.stream_seq,
            );
        }

        metrics::counter!("broker_messages_acked_total", "consumer" => delivery.consumer.clone()).increment(1);
        Ok(())
    }

    async fn nak(&self, delivery: &Delivery, error: &str) -> Result<()> {
        let letter = {
            let mut guard = self.state.lock().await;
            let BrokerState { streams, consumers } = &mut *guard;
            let state = consumers
                .get_mut(&delivery.consumer)
                .ok_or_else(|| MessagingError::ConsumerNotFound(delivery.consumer.clone()))?;

            if state.in_flight.remove(&delivery.stream_seq).is_none() {
                return Err(MessagingError::NotInFlight {
                    consumer: delivery.consumer.clone(),
                    stream_seq: delivery.stream_seq,
                });
            }

            let count = state
                .delivery_counts
                .get(&delivery.stream_seq)
                .copied()
                .unwrap_or(delivery.delivery_count);

            if count >= state.config.max_deliver {
                state.delivery_counts.remove(&delivery.stream_seq);
                let letter = dead_letter(
                    &state.config,
                    streams
                        .get(&delivery.stream)
                        .and_then(|s| s.messages.get(&delivery.stream_seq)),
                    Some(delivery),
                    error,
                    count,
                );
                settle(
                    streams,
                    consumers,
                    &delivery.consumer,
                    &delivery.stream,
                    delivery.stream_seq,
                );
                letter
            } else {
                tracing::debug!(
                    consumer = %delivery.consumer,
                    stream_seq = delivery.stream_seq,
                    delivery_count = count,
                    error,
                    "message nak'ed for redelivery"
                );
                let ready_at = Instant::now() + state.config.nak_delay;
                state.redeliver.insert(delivery.stream_seq, ready_at);
                metrics::counter!("broker_messages_redelivered_total", "consumer" => delivery.consumer.clone())
                    .increment(1);
                None
            }
        };

        if let Some(letter) = letter {
            self.record_dead_letters(vec![letter]).await;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn term(&self, delivery: &Delivery, error: &str) -> Result<()> {
        let letter = {
            let mut guard = self.state.lock().await;
            let BrokerState { streams, consumers } = &mut *guard;
            let state = consumers
                .get_mut(&delivery.consumer)
                .ok_or_else(|| MessagingError::ConsumerNotFound(delivery.consumer.clone()))?;

            if state.in_flight.remove(&delivery.stream_seq).is_none() {
                return Err(MessagingError::NotInFlight {
                    consumer: delivery.consumer.clone(),
                    stream_seq: delivery.stream_seq,
                });
            }
            let count = state
                .delivery_counts
                .remove(&delivery.stream_seq)
                .unwrap_or(delivery.delivery_count);

            let letter = dead_letter(
                &state.config,
                streams
                    .get(&delivery.stream)
                    .and_then(|s| s.messages.get(&delivery.stream_seq)),
                Some(delivery),
                error,
                count,
            );
            settle(
                streams,
                consumers,
                &delivery.consumer,
                &delivery.stream,
                delivery.stream_seq,
            );
            letter
        };

        if let Some(letter) = letter {
            self.record_dead_letters(vec![letter]).await;
        }
        Ok(())
    }

    async fn wait_for_messages(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Version;
    use crate::topology::{ORDERS_STREAM, standard_streams};

    fn envelope(subject: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .event_name("OrderCreated")
            .subject(subject)
            .aggregate_id("order-1")
            .aggregate_type("Order")
            .event_version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    async fn broker_with(consumers: Vec<ConsumerConfig>) -> (InMemoryBroker, InMemoryDeadLetters) {
        let letters = InMemoryDeadLetters::new();
        let broker = InMemoryBroker::new(Arc::new(letters.clone()));
        for stream in standard_streams() {
            broker.add_stream(stream).await.unwrap();
        }
        for consumer in consumers {
            broker.add_consumer(consumer).await.unwrap();
        }
        (broker, letters)
    }

    fn consumer(service: &str) -> ConsumerConfig {
        ConsumerConfig::for_service(service, ORDERS_STREAM, &["order.*"]).with_nak_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn publish_without_stream_fails() {
        let (broker, _) = broker_with(vec![]).await;
        let err = broker.publish(envelope("shipping.created")).await.unwrap_err();
        assert!(matches!(err, MessagingError::NoStreamForSubject(_)));
    }

    #[tokio::test]
    async fn republished_event_id_is_deduplicated() {
        let (broker, _) = broker_with(vec![]).await;
        let env = envelope("order.created");

        let first = broker.publish(env.clone()).await.unwrap();
        let second = broker.publish(env).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.sequence, second.sequence);
        assert_eq!(broker.stream_len(ORDERS_STREAM).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn overlapping_streams_are_rejected() {
        let (broker, _) = broker_with(vec![]).await;
        let err = broker
            .add_stream(StreamConfig::new("ORDERS_COPY", &["order.created"]))
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::OverlappingSubjects { .. }));
    }

    #[tokio::test]
    async fn queue_group_members_receive_distinct_messages() {
        let (broker, _) = broker_with(vec![consumer("inventory-service")]).await;
        broker.publish(envelope("order.created")).await.unwrap();
        broker.publish(envelope("order.created")).await.unwrap();

        let a = broker.fetch("inventory-service-orders", 1).await.unwrap();
        let b = broker.fetch("inventory-service-orders", 1).await.unwrap();
        let c = broker.fetch("inventory-service-orders", 1).await.unwrap();

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_ne!(a[0].stream_seq, b[0].stream_seq);
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn each_service_consumer_gets_its_own_copy() {
        let (broker, _) =
            broker_with(vec![consumer("inventory-service"), consumer("payment-service")]).await;
        broker.publish(envelope("order.created")).await.unwrap();

        let inventory = broker.fetch("inventory-service-orders", 10).await.unwrap();
        let payment = broker.fetch("payment-service-orders", 10).await.unwrap();
        assert_eq!(inventory.len(), 1);
        assert_eq!(payment.len(), 1);

        broker.ack(&inventory[0]).await.unwrap();
        assert_eq!(broker.stream_len(ORDERS_STREAM).await.unwrap(), 1);

        broker.ack(&payment[0]).await.unwrap();
        assert_eq!(broker.stream_len(ORDERS_STREAM).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn filter_skips_unwanted_subjects() {
        let filtered = ConsumerConfig::for_service("payment-service", ORDERS_STREAM, &["order.cancelled"]);
        let (broker, _) = broker_with(vec![filtered]).await;
        broker.publish(envelope("order.created")).await.unwrap();
        broker.publish(envelope("order.cancelled")).await.unwrap();

        let got = broker.fetch("payment-service-orders", 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].subject, "order.cancelled");
    }

    #[tokio::test]
    async fn nak_redelivers_until_max_deliver_then_dead_letters() {
        let (broker, letters) = broker_with(vec![consumer("order-service")]).await;
        broker.publish(envelope("order.created")).await.unwrap();

        for attempt in 1..=5 {
            let got = broker.fetch("order-service-orders", 1).await.unwrap();
            assert_eq!(got.len(), 1, "attempt {attempt}");
            assert_eq!(got[0].delivery_count, attempt);
            broker.nak(&got[0], "boom").await.unwrap();
        }

        assert!(broker.fetch("order-service-orders", 1).await.unwrap().is_empty());
        let dead = letters.all().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].delivery_count, 5);
        assert_eq!(dead[0].error, "boom");
        assert_eq!(dead[0].subject, "order.created.dlq");
        assert_eq!(broker.stream_len(ORDERS_STREAM).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn term_dead_letters_immediately() {
        let (broker, letters) = broker_with(vec![consumer("order-service")]).await;
        broker.publish(envelope("order.created")).await.unwrap();

        let got = broker.fetch("order-service-orders", 1).await.unwrap();
        broker.term(&got[0], "undecodable").await.unwrap();

        assert_eq!(letters.len().await, 1);
        assert_eq!(broker.pending("order-service-orders").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_delivery_is_redelivered_after_ack_wait() {
        let config = consumer("order-service").with_ack_wait(Duration::from_secs(30));
        let (broker, _) = broker_with(vec![config]).await;
        broker.publish(envelope("order.created")).await.unwrap();

        let first = broker.fetch("order-service-orders", 1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(broker.fetch("order-service-orders", 1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let again = broker.fetch("order-service-orders", 1).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn ack_of_unknown_delivery_fails() {
        let (broker, _) = broker_with(vec![consumer("order-service")]).await;
        broker.publish(envelope("order.created")).await.unwrap();
        let got = broker.fetch("order-service-orders", 1).await.unwrap();
        broker.ack(&got[0]).await.unwrap();

        let err = broker.ack(&got[0]).await.unwrap_err();
        assert!(matches!(err, MessagingError::NotInFlight { .. }));
    }
}
