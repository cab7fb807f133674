//! Shared identifiers and correlation context used by every service.

pub mod correlation;
pub mod types;

pub use correlation::{CAUSATION_ID_HEADER, CORRELATION_ID_HEADER, CorrelationContext, TRACE_ID_HEADER};
pub use types::AggregateId;
