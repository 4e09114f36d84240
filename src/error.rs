//! Error types for trigger attribute extraction.
//!
//! These errors never cross the instrumentation boundary: the span lifecycle
//! wrappers log them and continue, so a faulty extractor costs attributes,
//! not the invocation.

use thiserror::Error;

/// Errors produced while extracting attributes from a matched trigger.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The payload matched the trigger's predicate but did not deserialize
    /// as the trigger's event type.
    #[error("payload does not deserialize as {expected}")]
    EventMismatch {
        /// Name of the expected event type.
        expected: &'static str,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// The handler's response did not deserialize as the matched trigger's
    /// response type. End-of-invocation attributes are skipped; the span is
    /// still produced.
    #[error("response does not deserialize as {expected}")]
    ResponseMismatch {
        /// Name of the expected response type.
        expected: &'static str,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}
