//! Core aggregate and domain event traits.

use chrono::{DateTime, Utc};
use common::{AggregateId, CorrelationContext};
use messaging::{EventEnvelope, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DomainError, Result};

/// A fact that happened to an aggregate.
///
/// Implementors are serde enums tagged with `{"type": <event name>, "data": ...}`.
/// On the wire only `data` is carried as the envelope payload; the event
/// name travels in the envelope itself.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Every event name this type can decode.
    const EVENT_NAMES: &'static [&'static str];

    /// Stable event name used for dispatch.
    fn event_name(&self) -> &'static str;

    /// Broker subject the event is published on.
    fn subject(&self) -> &'static str;

    /// The event's data without the type tag.
    fn to_payload(&self) -> Result<serde_json::Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    /// Rebuilds an event from its name and payload.
    fn from_payload(event_name: &str, payload: &serde_json::Value) -> Result<Self> {
        if !Self::EVENT_NAMES.contains(&event_name) {
            return Err(DomainError::UnknownEvent(event_name.to_string()));
        }
        let tagged = serde_json::json!({ "type": event_name, "data": payload });
        Ok(serde_json::from_value(tagged)?)
    }

    fn from_envelope(envelope: &EventEnvelope) -> Result<Self> {
        Self::from_payload(&envelope.event_name, &envelope.payload)
    }
}

/// An event recorded by an aggregate but not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent<E> {
    pub event: E,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
}

impl<E: DomainEvent> RecordedEvent<E> {
    /// Wraps the event for publication, carrying `ctx` in its headers.
    pub fn to_envelope(
        &self,
        aggregate_type: &str,
        aggregate_id: &AggregateId,
        ctx: &CorrelationContext,
    ) -> Result<EventEnvelope> {
        Ok(EventEnvelope::builder()
            .event_name(self.event.event_name())
            .subject(self.event.subject())
            .aggregate_id(aggregate_id)
            .aggregate_type(aggregate_type)
            .event_version(self.version)
            .timestamp(self.timestamp)
            .payload_raw(self.event.to_payload()?)
            .correlation(ctx)
            .build()?)
    }
}

/// An aggregate root that records its own events.
///
/// Command methods validate, then call [`Aggregate::record`], which applies
/// the event, bumps the version and appends it to the pending list. The
/// repository drains the list with [`Aggregate::take_pending_events`] when
/// it commits.
pub trait Aggregate: Send + Sync + Sized {
    type Event: DomainEvent;

    type Error: std::error::Error + Send + Sync;

    fn aggregate_type() -> &'static str;

    fn id(&self) -> AggregateId;

    /// Version after the last recorded event; 0 before any event.
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    /// Applies an event to the state. Pure and infallible.
    fn apply(&mut self, event: &Self::Event);

    /// Sets the last-modified timestamp.
    fn touch(&mut self, at: DateTime<Utc>);

    fn pending_mut(&mut self) -> &mut Vec<RecordedEvent<Self::Event>>;

    fn pending_events(&self) -> &[RecordedEvent<Self::Event>];

    fn record(&mut self, event: Self::Event) {
        let now = Utc::now();
        self.apply(&event);
        let version = self.version().next();
        self.set_version(version);
        self.touch(now);
        self.pending_mut().push(RecordedEvent {
            event,
            version,
            timestamp: now,
        });
    }

    fn take_pending_events(&mut self) -> Vec<RecordedEvent<Self::Event>> {
        std::mem::take(self.pending_mut())
    }

    /// Version the aggregate had when it was loaded.
    fn persisted_version(&self) -> Version {
        let pending = self.pending_events().len() as u64;
        Version::new(self.version().as_u64().saturating_sub(pending))
    }
}
