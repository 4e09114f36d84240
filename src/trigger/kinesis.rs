//! Kinesis stream batch trigger.
//!
//! Producers that want correlation embed a `_context` object carrying
//! propagation fields inside each record's JSON payload. Each record is
//! decoded independently; records whose data is not JSON or carries no
//! usable context contribute no link.

use crate::attrs::FAAS_TRIGGER_TYPE;
use crate::error::TriggerError;
use crate::propagation::JsonCarrier;
use crate::request::InvocationRequest;
use crate::trigger::{Trigger, common_value, first_record_event_source};
use aws_lambda_events::kinesis::{KinesisEvent, KinesisEventRecord};
use opentelemetry::trace::{Link, SpanKind, TraceContextExt};
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_semantic_conventions::attribute::{
    FAAS_TRIGGER, MESSAGING_BATCH_MESSAGE_COUNT, MESSAGING_DESTINATION_NAME,
    MESSAGING_OPERATION_TYPE, MESSAGING_SYSTEM,
};
use serde_json::Value as JsonValue;

const ANONYMOUS_DESTINATION: &str = "(anonymous)";
const CONTEXT_FIELD: &str = "_context";

/// Trigger for Kinesis stream batches.
pub struct KinesisTrigger;

impl KinesisTrigger {
    /// Creates the trigger.
    pub fn new() -> Self {
        Self
    }

    fn parse_event(&self, request: &InvocationRequest) -> Result<KinesisEvent, TriggerError> {
        serde_json::from_value(request.payload().clone()).map_err(|source| {
            TriggerError::EventMismatch {
                expected: "KinesisEvent",
                source,
            }
        })
    }
}

impl Default for KinesisTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the stream name from an event source ARN.
///
/// ARN format: `arn:aws:kinesis:{region}:{account}:stream/{name}`
fn stream_name_from_arn(arn: &str) -> Option<&str> {
    arn.split_once("stream/").map(|(_, name)| name)
}

/// The stream name shared by every record in the batch, if any.
fn common_destination(event: &KinesisEvent) -> Option<&str> {
    common_value(
        event
            .records
            .iter()
            .map(|record| record.event_source_arn.as_deref()),
    )
    .and_then(stream_name_from_arn)
}

/// Finds the first `_context` object anywhere in a decoded record payload.
fn find_embedded_context(value: &JsonValue) -> Option<&serde_json::Map<String, JsonValue>> {
    match value {
        JsonValue::Object(map) => {
            if let Some(JsonValue::Object(context)) = map.get(CONTEXT_FIELD) {
                return Some(context);
            }
            map.values().find_map(find_embedded_context)
        }
        JsonValue::Array(items) => items.iter().find_map(find_embedded_context),
        _ => None,
    }
}

/// Extracts a span link from one record, independently of its siblings.
fn record_link(record: &KinesisEventRecord) -> Option<Link> {
    let payload: JsonValue = serde_json::from_slice(&record.kinesis.data).ok()?;
    let context = find_embedded_context(&payload)?;

    let cx = global::get_text_map_propagator(|propagator| {
        propagator.extract_with_context(&Context::new(), &JsonCarrier::new(context))
    });
    let span_context = cx.span().span_context().clone();
    if span_context.is_valid() {
        Some(Link::new(span_context, vec![], 0))
    } else {
        None
    }
}

impl Trigger for KinesisTrigger {
    fn name(&self) -> &'static str {
        "kinesis"
    }

    fn matches(&self, request: &InvocationRequest) -> bool {
        first_record_event_source(request.payload()) == Some("aws:kinesis")
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
            KeyValue::new(FAAS_TRIGGER_TYPE, "Kinesis"),
            KeyValue::new(MESSAGING_SYSTEM, "aws_kinesis"),
            KeyValue::new(MESSAGING_OPERATION_TYPE, "deliver"),
            KeyValue::new(MESSAGING_BATCH_MESSAGE_COUNT, event.records.len() as i64),
        ];

        if let Some(destination) = common_destination(&event) {
            attributes.push(KeyValue::new(
                MESSAGING_DESTINATION_NAME,
                destination.to_string(),
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_runtime::Context as LambdaContext;
    use opentelemetry_sdk::propagation::TraceContextPropagator;
    use serde_json::json;
    use serial_test::serial;

    // {"order":42,"_context":{"traceparent":"00-aaaa…-bbbb…-01"}}
    const DATA_WITH_CONTEXT: &str = "eyJvcmRlciI6NDIsIl9jb250ZXh0Ijp7InRyYWNlcGFyZW50IjoiMDAtYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWEtYmJiYmJiYmJiYmJiYmJiYi0wMSJ9fQ==";
    // {"order":43,"_context":{"traceparent":"garbage"}}
    const DATA_WITH_BAD_CONTEXT: &str =
        "eyJvcmRlciI6NDMsIl9jb250ZXh0Ijp7InRyYWNlcGFyZW50IjoiZ2FyYmFnZSJ9fQ==";
    // not json at all
    const DATA_NOT_JSON: &str = "bm90IGpzb24gYXQgYWxs";
    // {"order":44}
    const DATA_WITHOUT_CONTEXT: &str = "eyJvcmRlciI6NDR9";

    fn kinesis_record(data: &str, arn: &str) -> JsonValue {
        json!({
            "kinesis": {
                "kinesisSchemaVersion": "1.0",
                "partitionKey": "pk-1",
                "sequenceNumber": "49590338271490256608559692538361571095921575989136588898",
                "data": data,
                "approximateArrivalTimestamp": 1607497475.0
            },
            "eventSource": "aws:kinesis",
            "eventVersion": "1.0",
            "eventID": "shardId-000000000006:49590338271490256608559692538361571095921575989136588898",
            "eventName": "aws:kinesis:record",
            "invokeIdentityArn": "arn:aws:iam::123456789012:role/lambda-role",
            "awsRegion": "eu-west-2",
            "eventSourceARN": arn
        })
    }

    fn kinesis_event(data: &str) -> JsonValue {
        json!({"Records": [kinesis_record(data, "arn:aws:kinesis:eu-west-2:123456789012:stream/orders")]})
    }

    fn request(payload: JsonValue) -> InvocationRequest {
        InvocationRequest::new(payload, LambdaContext::default())
    }

    #[test]
    fn matches_kinesis_records() {
        let trigger = KinesisTrigger::new();

        assert!(trigger.matches(&request(kinesis_event(DATA_WITHOUT_CONTEXT))));
        assert!(!trigger.matches(&request(json!({
            "Records": [{"eventSource": "aws:sqs"}]
        }))));
    }

    #[test]
    fn span_name_uses_the_stream_name() {
        let trigger = KinesisTrigger::new();
        assert_eq!(
            trigger.span_name(&request(kinesis_event(DATA_WITHOUT_CONTEXT))),
            "orders deliver"
        );
        assert_eq!(trigger.span_kind(), SpanKind::Consumer);
    }

    #[test]
    fn mixed_streams_are_anonymous() {
        let trigger = KinesisTrigger::new();
        let payload = json!({"Records": [
            kinesis_record(DATA_WITHOUT_CONTEXT, "arn:aws:kinesis:eu-west-2:123456789012:stream/orders"),
            kinesis_record(DATA_WITHOUT_CONTEXT, "arn:aws:kinesis:eu-west-2:123456789012:stream/refunds"),
        ]});

        assert_eq!(trigger.span_name(&request(payload)), "(anonymous) deliver");
    }

    #[test]
    #[serial]
    fn links_from_embedded_context() {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let trigger = KinesisTrigger::new();

        let links = trigger.links(&request(kinesis_event(DATA_WITH_CONTEXT)));

        assert_eq!(links.len(), 1);
        assert_eq!(
            links[0].span_context.trace_id().to_string(),
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    #[serial]
    fn undecodable_records_are_skipped_individually() {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let trigger = KinesisTrigger::new();
        let arn = "arn:aws:kinesis:eu-west-2:123456789012:stream/orders";
        let payload = json!({"Records": [
            kinesis_record(DATA_WITH_CONTEXT, arn),
            kinesis_record(DATA_WITH_BAD_CONTEXT, arn),
            kinesis_record(DATA_NOT_JSON, arn),
            kinesis_record(DATA_WITHOUT_CONTEXT, arn),
        ]});

        let links = trigger.links(&request(payload));
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn stream_name_parsing() {
        assert_eq!(
            stream_name_from_arn("arn:aws:kinesis:eu-west-2:123456789012:stream/orders"),
            Some("orders")
        );
        assert_eq!(stream_name_from_arn("arn:aws:sqs:eu-west-2:1:orders"), None);
    }
}
