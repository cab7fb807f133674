//! Correlation context carried on every envelope and inbound call.
//!
//! A single saga run keeps one correlation id from the first inbound call
//! through every event emitted by the three services. The causation id
//! names the event (or request) that directly produced the current one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the end-to-end correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Header carrying the id of the message that caused this one.
pub const CAUSATION_ID_HEADER: &str = "x-causation-id";

/// Header carrying the distributed trace id.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Correlation identifiers propagated across service boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub trace_id: String,
}

impl CorrelationContext {
    /// Starts a fresh context: new correlation id, trace id shared with it.
    pub fn new() -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            correlation_id: id.clone(),
            causation_id: None,
            trace_id: id,
        }
    }

    /// Reads a context from header-like key/value pairs.
    ///
    /// Missing or blank correlation ids are generated; a missing trace id
    /// falls back to the correlation id.
    pub fn from_headers(headers: &HashMap<String, String>) -> Self {
        let lookup = |key: &str| {
            headers
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let correlation_id = lookup(CORRELATION_ID_HEADER).unwrap_or_else(|| Uuid::new_v4().to_string());
        let trace_id = lookup(TRACE_ID_HEADER).unwrap_or_else(|| correlation_id.clone());

        Self {
            causation_id: lookup(CAUSATION_ID_HEADER),
            correlation_id,
            trace_id,
        }
    }

    /// Writes the context into a header map, overwriting existing values.
    pub fn inject(&self, headers: &mut HashMap<String, String>) {
        headers.insert(CORRELATION_ID_HEADER.to_string(), self.correlation_id.clone());
        headers.insert(TRACE_ID_HEADER.to_string(), self.trace_id.clone());
        match &self.causation_id {
            Some(causation) => {
                headers.insert(CAUSATION_ID_HEADER.to_string(), causation.clone());
            }
            None => {
                headers.remove(CAUSATION_ID_HEADER);
            }
        }
    }

    /// Derives the context for a message caused by `cause_id`.
    ///
    /// Correlation and trace ids are preserved.
    pub fn caused_by(&self, cause_id: impl Into<String>) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            causation_id: Some(cause_id.into()),
            trace_id: self.trace_id.clone(),
        }
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}
