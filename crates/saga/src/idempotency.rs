//! Processed-event tracking for at-least-once delivery.

use std::collections::HashSet;

use async_trait::async_trait;
use messaging::{EventEnvelope, Version};
use tokio::sync::RwLock;

/// Identity of an event for deduplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub aggregate_id: String,
    pub event_name: String,
    pub version: Version,
}

impl DedupeKey {
    pub fn of(envelope: &EventEnvelope) -> Self {
        Self {
            aggregate_id: envelope.aggregate_id.clone(),
            event_name: envelope.event_name.clone(),
            version: envelope.event_version,
        }
    }
}

/// Remembers which events a service has fully handled.
///
/// A key is marked only after its handler succeeded, so a failed attempt
/// is retried on redelivery.
#[async_trait]
pub trait ProcessedEvents: Send + Sync {
    async fn is_processed(&self, key: &DedupeKey) -> bool;

    async fn mark_processed(&self, key: DedupeKey);
}

#[derive(Debug, Default)]
pub struct InMemoryProcessedEvents {
    keys: RwLock<HashSet<DedupeKey>>,
}

impl InMemoryProcessedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

#[async_trait]
impl ProcessedEvents for InMemoryProcessedEvents {
    async fn is_processed(&self, key: &DedupeKey) -> bool {
        self.keys.read().await.contains(key)
    }

    async fn mark_processed(&self, key: DedupeKey) {
        self.keys.write().await.insert(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(version: u64) -> DedupeKey {
        DedupeKey {
            aggregate_id: "order-1".into(),
            event_name: "OrderCreated".into(),
            version: Version::new(version),
        }
    }

    #[tokio::test]
    async fn version_is_part_of_identity() {
        let store = InMemoryProcessedEvents::new();
        store.mark_processed(key(1)).await;
        store.mark_processed(key(1)).await;

        assert!(store.is_processed(&key(1)).await);
        assert!(!store.is_processed(&key(2)).await);
        assert_eq!(store.len().await, 1);
    }
}
