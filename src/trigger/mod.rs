//! Trigger classification for Lambda event payloads.
//!
//! A [`Trigger`] describes one event source shape: a cheap structural
//! predicate over the raw JSON payload, span naming, span kind, and
//! fallible attribute extraction for span start and end. Matching never
//! deserializes the full event; attribute extraction does, and its failure
//! is contained by the span lifecycle wrappers.

pub mod api_gateway_http;
pub mod api_gateway_rest;
pub mod kinesis;
pub mod registry;
pub mod s3;
pub mod sqs;

use crate::error::TriggerError;
use crate::request::InvocationRequest;
use opentelemetry::trace::{Link, SpanKind, Status};
use opentelemetry::{Array, KeyValue, StringValue, Value};
use serde::Deserialize;
use serde_json::Value as JsonValue;

pub use registry::TriggerRegistry;

/// One event-source shape the registry can classify.
///
/// Implementations are stateless apart from configuration captured at
/// construction and are shared across concurrent invocations.
pub trait Trigger: Send + Sync {
    /// Stable identifier used in diagnostics, e.g. `"api-gateway-rest"`.
    fn name(&self) -> &'static str;

    /// Structural predicate over the raw payload. Must be cheap and must
    /// not deserialize the full event.
    fn matches(&self, request: &InvocationRequest) -> bool;

    /// Name for the trigger span.
    fn span_name(&self, request: &InvocationRequest) -> String;

    /// Kind for the trigger span.
    fn span_kind(&self) -> SpanKind;

    /// Attributes recorded when the trigger span opens.
    fn on_start(&self, request: &InvocationRequest) -> Result<Vec<KeyValue>, TriggerError>;

    /// Attributes recorded when the trigger span closes.
    fn on_end(
        &self,
        request: &InvocationRequest,
        response: Option<&JsonValue>,
        error: Option<&str>,
    ) -> Result<Vec<KeyValue>, TriggerError> {
        let _ = (request, response, error);
        Ok(Vec::new())
    }

    /// Final status for the trigger span.
    fn status(
        &self,
        request: &InvocationRequest,
        response: Option<&JsonValue>,
        error: Option<&str>,
    ) -> Status {
        let _ = (request, response);
        match error {
            Some(message) => Status::error(message.to_string()),
            None => Status::Unset,
        }
    }

    /// Links to upstream producer spans, one per decodable record. A record
    /// whose embedded context cannot be decoded contributes no link and
    /// never fails the batch.
    fn links(&self, request: &InvocationRequest) -> Vec<Link> {
        let _ = request;
        Vec::new()
    }

    /// Per-record span specs for batch triggers.
    fn message_spans(&self, request: &InvocationRequest) -> Vec<MessageSpanSpec> {
        let _ = request;
        Vec::new()
    }
}

/// Description of one per-record message span.
#[derive(Debug, Default)]
pub struct MessageSpanSpec {
    /// Span name.
    pub name: String,
    /// Record-level attributes.
    pub attributes: Vec<KeyValue>,
    /// Link to the record's producer span, when decodable.
    pub links: Vec<Link>,
}

/// Truncates a payload string to at most `limit` bytes.
///
/// Backs off to the previous character boundary when the cut would split a
/// UTF-8 sequence, so the result is always valid UTF-8.
pub fn limited_payload(payload: &str, limit: usize) -> &str {
    if payload.len() <= limit {
        return payload;
    }
    let mut end = limit;
    while end > 0 && !payload.is_char_boundary(end) {
        end -= 1;
    }
    &payload[..end]
}

/// Builds an attribute from a multi-valued field.
///
/// Exactly one value yields a scalar, more than one an ordered string array,
/// zero values no attribute at all.
pub(crate) fn multi_value_attribute(key: String, values: Vec<String>) -> Option<KeyValue> {
    match values.len() {
        0 => None,
        1 => {
            let mut values = values;
            Some(KeyValue::new(key, values.remove(0)))
        }
        _ => Some(KeyValue::new(
            key,
            Value::Array(Array::String(
                values.into_iter().map(StringValue::from).collect(),
            )),
        )),
    }
}

/// Rewrites a header name into an attribute-key-safe form.
pub(crate) fn attribute_safe_name(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

/// Event source of the first record, e.g. `"aws:sqs"`. The discriminator
/// used by record-based trigger predicates.
pub(crate) fn first_record_event_source(payload: &JsonValue) -> Option<&str> {
    payload
        .get("Records")?
        .get(0)?
        .get("eventSource")
        .and_then(JsonValue::as_str)
}

/// Lenient view of a gateway-shaped handler response.
///
/// Real handler responses routinely omit the optional gateway fields, so
/// only the two the span records are read; unknown fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GatewayResponse {
    #[serde(default)]
    pub(crate) status_code: Option<i64>,
    #[serde(default)]
    pub(crate) body: Option<String>,
}

/// Parses a handler response as a gateway response, reserving the mismatch
/// error for shapes that are not gateway responses at all.
pub(crate) fn parse_gateway_response(
    response: &JsonValue,
    expected: &'static str,
) -> Result<GatewayResponse, TriggerError> {
    serde_json::from_value(response.clone())
        .map_err(|source| TriggerError::ResponseMismatch { expected, source })
}

/// Pulls a numeric `statusCode` out of a gateway-shaped response.
pub(crate) fn http_status_code(response: &JsonValue) -> Option<i64> {
    response
        .as_object()
        .and_then(|object| object.get("statusCode"))
        .and_then(JsonValue::as_i64)
}

/// Returns the value shared by every element, if any.
pub(crate) fn common_value<'a, I>(mut values: I) -> Option<&'a str>
where
    I: Iterator<Item = Option<&'a str>>,
{
    let first = values.next()??;
    for value in values {
        if value != Some(first) {
            return None;
        }
    }
    Some(first)
}
