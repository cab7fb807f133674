use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::CorrelationContext;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{MessagingError, Result};

/// Unique identifier for a published event.
///
/// Doubles as the broker message id used for publish-side deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-aggregate event version.
///
/// Starts at 0 for an aggregate with no events; the first event is version 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn initial() -> Self {
        Self(0)
    }

    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The wire form of every event crossing a service boundary.
///
/// `event_name` is the discriminator consumers switch on; `payload` holds
/// the event data only. Correlation ids travel in `headers` under the
/// conventional `x-*` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_name: String,
    pub subject: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_version: Version,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl EventEnvelope {
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Extracts the correlation context, generating ids that are missing.
    pub fn correlation(&self) -> CorrelationContext {
        CorrelationContext::from_headers(&self.headers)
    }

    /// Deserializes the payload into a concrete data type.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(MessagingError::from)
    }
}

/// Builder for [`EventEnvelope`].
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_name: Option<String>,
    subject: Option<String>,
    aggregate_id: Option<String>,
    aggregate_type: Option<String>,
    event_version: Option<Version>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    headers: HashMap<String, String>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn aggregate_id(mut self, id: impl ToString) -> Self {
        self.aggregate_id = Some(id.to_string());
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn event_version(mut self, version: Version) -> Self {
        self.event_version = Some(version);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Injects the correlation headers.
    pub fn correlation(mut self, ctx: &CorrelationContext) -> Self {
        ctx.inject(&mut self.headers);
        self
    }

    /// Builds the envelope, naming the first missing required field on error.
    pub fn build(self) -> Result<EventEnvelope> {
        let missing = MessagingError::IncompleteEnvelope;
        let mut headers = self.headers;
        if !headers.contains_key(common::CORRELATION_ID_HEADER) {
            CorrelationContext::new().inject(&mut headers);
        }

        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_name: self.event_name.ok_or(missing("event_name"))?,
            subject: self.subject.ok_or(missing("subject"))?,
            aggregate_id: self.aggregate_id.ok_or(missing("aggregate_id"))?,
            aggregate_type: self.aggregate_type.ok_or(missing("aggregate_type"))?,
            event_version: self.event_version.ok_or(missing("event_version"))?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.ok_or(missing("payload"))?,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use common::{CAUSATION_ID_HEADER, CORRELATION_ID_HEADER};

    use super::*;

    fn sample() -> EventEnvelopeBuilder {
        EventEnvelope::builder()
            .event_name("OrderCreated")
            .subject("order.created")
            .aggregate_id("order-1")
            .aggregate_type("Order")
            .event_version(Version::first())
            .payload_raw(serde_json::json!({"customerId": "c-1"}))
    }

    #[test]
    fn version_sequence() {
        assert_eq!(Version::initial().next(), Version::first());
        assert!(Version::first() < Version::new(2));
        assert_eq!(Version::new(7).as_u64(), 7);
    }

    #[test]
    fn build_generates_correlation_when_absent() {
        let envelope = sample().build().unwrap();
        let correlation = envelope.headers.get(CORRELATION_ID_HEADER).unwrap();
        assert!(!correlation.is_empty());
        assert_eq!(&envelope.correlation().correlation_id, correlation);
    }

    #[test]
    fn build_keeps_supplied_correlation() {
        let ctx = CorrelationContext::new().caused_by("evt-0");
        let envelope = sample().correlation(&ctx).build().unwrap();

        assert_eq!(envelope.correlation(), ctx);
        assert_eq!(
            envelope.headers.get(CAUSATION_ID_HEADER).map(String::as_str),
            Some("evt-0")
        );
    }

    #[test]
    fn build_reports_missing_field() {
        let err = EventEnvelope::builder()
            .event_name("OrderCreated")
            .build()
            .unwrap_err();
        assert!(matches!(err, MessagingError::IncompleteEnvelope("subject")));
    }

    #[test]
    fn wire_form_uses_camel_case_keys() {
        let envelope = sample().build().unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["eventName"], "OrderCreated");
        assert_eq!(json["eventVersion"], 1);
        assert_eq!(json["aggregateId"], "order-1");
    }

    #[test]
    fn decode_payload_into_struct() {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            customer_id: String,
        }

        let data: Data = sample().build().unwrap().decode_payload().unwrap();
        assert_eq!(data.customer_id, "c-1");
    }
}
