use resilience::{Classify, ErrorKind};
use thiserror::Error;

/// Errors raised by the broker, consumers and the outbox relay.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// No configured stream captures the subject.
    #[error("No stream accepts subject {0}")]
    NoStreamForSubject(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    /// A stream was added whose subjects overlap an existing stream.
    #[error("Subjects of stream {stream} overlap stream {existing}")]
    OverlappingSubjects { stream: String, existing: String },

    /// Ack/nak for a message the consumer does not hold in flight.
    #[error("Message {stream_seq} is not in flight for consumer {consumer}")]
    NotInFlight { consumer: String, stream_seq: u64 },

    #[error("Envelope is missing {0}")]
    IncompleteEnvelope(&'static str),

    /// The broker could not be reached or refused the operation for now.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Classify for MessagingError {
    fn kind(&self) -> ErrorKind {
        match self {
            MessagingError::Unavailable(_) => ErrorKind::Unavailable,
            MessagingError::Serialization(_) | MessagingError::IncompleteEnvelope(_) => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Other,
        }
    }
}

/// Outcome reported by an event handler that did not succeed.
///
/// `Retry` naks the message so the broker redelivers it (bounded by
/// `max_deliver`); `Reject` sends it straight to the dead-letter path.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("retryable: {0}")]
    Retry(String),

    #[error("rejected: {0}")]
    Reject(String),
}

impl HandlerError {
    pub fn reason(&self) -> &str {
        match self {
            HandlerError::Retry(reason) | HandlerError::Reject(reason) => reason,
        }
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
