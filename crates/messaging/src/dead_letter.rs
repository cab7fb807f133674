//! Poisoned messages routed out of the delivery path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::EventEnvelope;

/// A message that exhausted its deliveries or was rejected by its handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: Uuid,
    pub original_subject: String,
    /// `<original subject>.dlq`
    pub subject: String,
    pub stream: String,
    pub consumer: String,
    pub envelope: EventEnvelope,
    pub error: String,
    pub delivery_count: u32,
    pub failed_at: DateTime<Utc>,
}

/// Operator-facing destination for dead letters.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter);
}

/// Dead letters kept in memory for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetters {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<DeadLetter> {
        self.letters.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.letters.read().await.is_empty()
    }

    /// Dead letters recorded by one consumer.
    pub async fn for_consumer(&self, consumer: &str) -> Vec<DeadLetter> {
        self.letters
            .read()
            .await
            .iter()
            .filter(|l| l.consumer == consumer)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn record(&self, letter: DeadLetter) {
        tracing::error!(
            dead_letter_id = %letter.id,
            subject = %letter.subject,
            consumer = %letter.consumer,
            event_name = %letter.envelope.event_name,
            deliveries = letter.delivery_count,
            error = %letter.error,
            "message dead-lettered"
        );
        self.letters.write().await.push(letter);
    }
}
