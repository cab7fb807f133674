//! Stream and consumer configuration.
//!
//! Three streams carry the saga traffic:
//!
//! ```text
//! ORDERS     order.*      work-queue  24h
//! PAYMENTS   payment.*    work-queue  24h
//! INVENTORY  inventory.*  work-queue  24h
//! ```
//!
//! Every service that needs an event owns its own durable consumer on the
//! stream, so one event fans out to each interested service. Instances of
//! the same service pull from that one durable consumer as a queue group,
//! which hands each message to a single instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ORDERS_STREAM: &str = "ORDERS";
pub const PAYMENTS_STREAM: &str = "PAYMENTS";
pub const INVENTORY_STREAM: &str = "INVENTORY";

/// Default bound on delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVER: u32 = 5;

const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(120);
const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

/// How long a stream keeps messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retention {
    /// Kept until every consumer bound to the subject has acked, or max age.
    WorkQueue,
    /// Kept until max age regardless of acks.
    Limits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: Retention,
    pub max_age: Duration,
    /// Window in which a re-published event id is dropped as a duplicate.
    pub duplicate_window: Duration,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, subjects: &[&str]) -> Self {
        Self {
            name: name.into(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            retention: Retention::WorkQueue,
            max_age: DEFAULT_MAX_AGE,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window = window;
        self
    }

    /// Returns true if any of the stream's subject patterns captures `subject`.
    pub fn captures(&self, subject: &str) -> bool {
        self.subjects.iter().any(|p| subject_matches(p, subject))
    }
}

/// Acknowledgment policy. Only explicit acknowledgment is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AckPolicy {
    #[default]
    Explicit,
}

/// A durable, named, subject-filtered consumer on one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub durable_name: String,
    pub stream: String,
    pub filter_subjects: Vec<String>,
    pub queue_group: String,
    pub ack_policy: AckPolicy,
    /// Time an unacked delivery stays in flight before it is redelivered.
    pub ack_wait: Duration,
    pub max_deliver: u32,
    /// Delay before a nak'ed message becomes deliverable again.
    pub nak_delay: Duration,
}

impl ConsumerConfig {
    /// Creates a consumer for `service` on `stream`.
    ///
    /// The durable name is `<service>-<stream in lowercase>` and the queue
    /// group is `<service>-queue`.
    pub fn for_service(service: &str, stream: &str, filter_subjects: &[&str]) -> Self {
        Self {
            durable_name: format!("{service}-{}", stream.to_lowercase()),
            stream: stream.to_string(),
            filter_subjects: filter_subjects.iter().map(|s| s.to_string()).collect(),
            queue_group: queue_group_for(service),
            ack_policy: AckPolicy::Explicit,
            ack_wait: DEFAULT_ACK_WAIT,
            max_deliver: DEFAULT_MAX_DELIVER,
            nak_delay: Duration::from_millis(500),
        }
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: u32) -> Self {
        self.max_deliver = max_deliver.max(1);
        self
    }

    pub fn with_nak_delay(mut self, delay: Duration) -> Self {
        self.nak_delay = delay;
        self
    }

    /// Returns true if this consumer wants messages on `subject`.
    pub fn accepts(&self, subject: &str) -> bool {
        self.filter_subjects.is_empty()
            || self.filter_subjects.iter().any(|f| subject_matches(f, subject))
    }
}

/// Queue group name for a service.
pub fn queue_group_for(service: &str) -> String {
    format!("{service}-queue")
}

/// Subject used when recording a poisoned message.
pub fn dead_letter_subject(subject: &str) -> String {
    format!("{subject}.dlq")
}

/// The three saga streams.
pub fn standard_streams() -> Vec<StreamConfig> {
    vec![
        StreamConfig::new(ORDERS_STREAM, &["order.*"]),
        StreamConfig::new(PAYMENTS_STREAM, &["payment.*"]),
        StreamConfig::new(INVENTORY_STREAM, &["inventory.*"]),
    ]
}

/// Token-wise subject matching with `*` (one token) and `>` (the rest).
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Returns true if some subject could be captured by both patterns.
pub(crate) fn patterns_overlap(a: &str, b: &str) -> bool {
    let mut a_tokens = a.split('.');
    let mut b_tokens = b.split('.');

    loop {
        match (a_tokens.next(), b_tokens.next()) {
            (Some(">"), Some(_)) | (Some(_), Some(">")) => return true,
            (Some("*"), Some(_)) | (Some(_), Some("*")) => continue,
            (Some(x), Some(y)) if x == y => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_exactly_one_token() {
        assert!(subject_matches("order.*", "order.created"));
        assert!(!subject_matches("order.*", "order.created.dlq"));
        assert!(!subject_matches("order.*", "order"));
        assert!(!subject_matches("order.*", "payment.created"));
    }

    #[test]
    fn greater_than_matches_remaining_tokens() {
        assert!(subject_matches("order.>", "order.created"));
        assert!(subject_matches("order.>", "order.created.dlq"));
        assert!(!subject_matches("order.>", "order"));
    }

    #[test]
    fn literal_subjects_match_only_themselves() {
        assert!(subject_matches("payment.failed", "payment.failed"));
        assert!(!subject_matches("payment.failed", "payment.succeeded"));
    }

    #[test]
    fn standard_streams_are_work_queues_with_one_day_age() {
        let streams = standard_streams();
        assert_eq!(streams.len(), 3);
        for stream in &streams {
            assert_eq!(stream.retention, Retention::WorkQueue);
            assert_eq!(stream.max_age, Duration::from_secs(86_400));
        }
        assert!(streams[0].captures("order.created"));
        assert!(streams[1].captures("payment.refunded"));
        assert!(streams[2].captures("inventory.reserved"));
    }

    #[test]
    fn service_consumer_naming() {
        let consumer = ConsumerConfig::for_service("order-service", PAYMENTS_STREAM, &["payment.succeeded"]);
        assert_eq!(consumer.durable_name, "order-service-payments");
        assert_eq!(consumer.queue_group, "order-service-queue");
        assert_eq!(consumer.max_deliver, 5);
        assert_eq!(consumer.ack_policy, AckPolicy::Explicit);
        assert!(consumer.accepts("payment.succeeded"));
        assert!(!consumer.accepts("payment.created"));
    }

    #[test]
    fn overlap_detection() {
        assert!(patterns_overlap("order.*", "order.created"));
        assert!(patterns_overlap("order.>", "order.*"));
        assert!(!patterns_overlap("order.*", "payment.*"));
    }

    #[test]
    fn dead_letter_subject_suffix() {
        assert_eq!(dead_letter_subject("payment.failed"), "payment.failed.dlq");
    }
}
