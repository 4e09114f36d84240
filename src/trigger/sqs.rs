//! SQS batch trigger.
//!
//! SQS batches are linked, not parented: each record may originate from a
//! different upstream trace, so the trigger span carries one link per
//! decodable record. Context is probed first in the record's message
//! attributes (W3C form, producer-injected), then in the `AWSTraceHeader`
//! system attribute (X-Ray form).

use crate::attrs::{FAAS_TRIGGER_TYPE, RPC_REQUEST_PAYLOAD};
use crate::error::TriggerError;
use crate::propagation::Carrier;
use crate::request::InvocationRequest;
use crate::trigger::{
    MessageSpanSpec, Trigger, common_value, first_record_event_source, limited_payload,
};
use aws_lambda_events::sqs::{SqsEvent, SqsMessage};
use opentelemetry::trace::{Link, SpanContext, SpanId, SpanKind, TraceContextExt, TraceFlags,
    TraceId, TraceState};
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_semantic_conventions::attribute::{
    FAAS_TRIGGER, MESSAGING_BATCH_MESSAGE_COUNT, MESSAGING_DESTINATION_NAME,
    MESSAGING_MESSAGE_ID, MESSAGING_OPERATION_TYPE, MESSAGING_SYSTEM,
};
use std::collections::HashMap;

const ANONYMOUS_DESTINATION: &str = "(anonymous)";

/// Trigger for SQS message batches.
pub struct SqsTrigger {
    payload_limit: usize,
}

impl SqsTrigger {
    /// Creates the trigger with the configured payload byte limit.
    pub fn new(payload_limit: usize) -> Self {
        Self { payload_limit }
    }

    fn parse_event(&self, request: &InvocationRequest) -> Result<SqsEvent, TriggerError> {
        serde_json::from_value(request.payload().clone()).map_err(|source| {
            TriggerError::EventMismatch {
                expected: "SqsEvent",
                source,
            }
        })
    }
}

/// Extracts the queue name from an event source ARN.
///
/// ARN format: `arn:aws:sqs:{region}:{account}:{queue-name}`
fn queue_name_from_arn(arn: &str) -> Option<&str> {
    arn.rsplit(':').next()
}

/// The queue name shared by every record in the batch, if any.
fn common_destination(event: &SqsEvent) -> Option<&str> {
    common_value(
        event
            .records
            .iter()
            .map(|record| record.event_source_arn.as_deref()),
    )
    .and_then(queue_name_from_arn)
}

/// Extracts a span link from one record, independently of its siblings.
fn record_link(record: &SqsMessage) -> Option<Link> {
    // Producer-injected W3C context in message attributes wins.
    let carrier: HashMap<String, String> = record
        .message_attributes
        .iter()
        .filter_map(|(key, attr)| {
            attr.string_value
                .clone()
                .map(|value| (key.clone(), value))
        })
        .collect();
    if !carrier.is_empty() {
        let cx = global::get_text_map_propagator(|propagator| {
            propagator.extract_with_context(&Context::new(), &Carrier::new(&carrier))
        });
        let span_context = cx.span().span_context().clone();
        if span_context.is_valid() {
            return Some(Link::new(span_context, vec![], 0));
        }
    }

    // AWSTraceHeader lives in the system attributes, NOT message_attributes.
    let trace_header = record.attributes.get("AWSTraceHeader")?;
    let span_context = parse_xray_trace_header(trace_header)?;
    Some(Link::new(span_context, vec![], 0))
}

impl Trigger for SqsTrigger {
    fn name(&self) -> &'static str {
        "sqs"
    }

    fn matches(&self, request: &InvocationRequest) -> bool {
        first_record_event_source(request.payload()) == Some("aws:sqs")
    }

    fn span_name(&self, request: &InvocationRequest) -> String {
        let destination = self
            .parse_event(request)
            .ok()
            .and_then(|event| common_destination(&event).map(str::to_owned))
            .unwrap_or_else(|| ANONYMOUS_DESTINATION.to_owned());
        format!("{destination} deliver")
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Consumer
    }

    fn on_start(&self, request: &InvocationRequest) -> Result<Vec<KeyValue>, TriggerError> {
        let event = self.parse_event(request)?;

        let mut attributes = vec![
            KeyValue::new(FAAS_TRIGGER, "pubsub"),
            KeyValue::new(FAAS_TRIGGER_TYPE, "SQS"),
            KeyValue::new(MESSAGING_SYSTEM, "aws_sqs"),
            KeyValue::new(MESSAGING_OPERATION_TYPE, "deliver"),
            KeyValue::new(MESSAGING_BATCH_MESSAGE_COUNT, event.records.len() as i64),
        ];

        if let Some(destination) = common_destination(&event) {
            attributes.push(KeyValue::new(
                MESSAGING_DESTINATION_NAME,
                destination.to_string(),
            ));
        }

        if let Some(body) = event.records.first().and_then(|r| r.body.as_deref()) {
            attributes.push(KeyValue::new(
                RPC_REQUEST_PAYLOAD,
                limited_payload(body, self.payload_limit).to_string(),
            ));
        }

        Ok(attributes)
    }

    fn links(&self, request: &InvocationRequest) -> Vec<Link> {
        let Ok(event) = self.parse_event(request) else {
            return Vec::new();
        };
        event.records.iter().filter_map(record_link).collect()
    }

    fn message_spans(&self, request: &InvocationRequest) -> Vec<MessageSpanSpec> {
        let Ok(event) = self.parse_event(request) else {
            return Vec::new();
        };

        event
            .records
            .iter()
            .map(|record| {
                let destination = record
                    .event_source_arn
                    .as_deref()
                    .and_then(queue_name_from_arn)
                    .unwrap_or(ANONYMOUS_DESTINATION);

                let mut attributes = vec![
                    KeyValue::new(MESSAGING_SYSTEM, "aws_sqs"),
                    KeyValue::new(MESSAGING_DESTINATION_NAME, destination.to_string()),
                ];
                if let Some(ref message_id) = record.message_id {
                    attributes.push(KeyValue::new(MESSAGING_MESSAGE_ID, message_id.to_string()));
                }

                MessageSpanSpec {
                    name: format!("{destination} process"),
                    attributes,
                    links: record_link(record).into_iter().collect(),
                }
            })
            .collect()
    }
}

/// Parses an X-Ray trace header into a SpanContext.
///
/// X-Ray format: `Root=1-{epoch}-{random};Parent={span-id};Sampled={0|1}`
pub fn parse_xray_trace_header(header: &str) -> Option<SpanContext> {
    let mut trace_id_str = None;
    let mut parent_id_str = None;
    let mut sampled = false;

    for part in header.split(';') {
        let part = part.trim();
        if let Some(root) = part.strip_prefix("Root=") {
            trace_id_str = convert_xray_trace_id(root);
        } else if let Some(parent) = part.strip_prefix("Parent=") {
            parent_id_str = Some(parent.to_string());
        } else if part == "Sampled=1" {
            sampled = true;
        }
    }

    let trace_id_hex = trace_id_str?;
    let parent_id_hex = parent_id_str?;

    // Trace ID: 32 hex chars = 16 bytes, span ID: 16 hex chars = 8 bytes.
    let trace_id = TraceId::from_bytes(hex_to_bytes::<16>(&trace_id_hex)?);
    let span_id = SpanId::from_bytes(hex_to_bytes::<8>(&parent_id_hex)?);

    let flags = if sampled {
        TraceFlags::SAMPLED
    } else {
        TraceFlags::default()
    };

    Some(SpanContext::new(
        trace_id,
        span_id,
        flags,
        true, // is_remote
        TraceState::default(),
    ))
}

/// Converts X-Ray trace ID format to a 32-character hex string.
///
/// X-Ray format: `1-{epoch_hex}-{random_hex}` (8 + 24 = 32 chars)
fn convert_xray_trace_id(xray_id: &str) -> Option<String> {
    let parts: Vec<&str> = xray_id.split('-').collect();
    if parts.len() == 3 && parts[0] == "1" {
        let combined = format!("{}{}", parts[1], parts[2]);
        if combined.len() == 32 {
            return Some(combined);
        }
    }
    None
}

/// Converts a hex string to a fixed-size byte array.
fn hex_to_bytes<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 {
        return None;
    }

    let mut bytes = [0u8; N];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let high = hex_char_to_nibble(chunk[0])?;
        let low = hex_char_to_nibble(chunk[1])?;
        bytes[i] = (high << 4) | low;
    }
    Some(bytes)
}

/// Converts a single hex character to its 4-bit value.
fn hex_char_to_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
