//! S3 bucket notification trigger.

use crate::attrs::{FAAS_TRIGGER_TYPE, RPC_REQUEST_PAYLOAD};
use crate::error::TriggerError;
use crate::request::InvocationRequest;
use crate::trigger::{Trigger, first_record_event_source, limited_payload};
use aws_lambda_events::s3::S3Event;
use opentelemetry::KeyValue;
use opentelemetry::trace::SpanKind;
use opentelemetry_semantic_conventions::attribute::FAAS_TRIGGER;
use serde_json::Value as JsonValue;

const MULTI_TRIGGER_NAME: &str = "s3 multi trigger";

/// Trigger for S3 bucket notifications.
///
/// A notification normally carries exactly one record and the span is named
/// after its event name, e.g. `ObjectCreated:Put`. Multi-record batches get
/// a fixed name.
pub struct S3Trigger {
    payload_limit: usize,
}

impl S3Trigger {
    /// Creates the trigger with the configured payload byte limit.
    pub fn new(payload_limit: usize) -> Self {
        Self { payload_limit }
    }
}

impl Trigger for S3Trigger {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn matches(&self, request: &InvocationRequest) -> bool {
        first_record_event_source(request.payload()) == Some("aws:s3")
    }

    fn span_name(&self, request: &InvocationRequest) -> String {
        let records = request
            .payload()
            .get("Records")
            .and_then(JsonValue::as_array);
        match records {
            Some(records) if records.len() == 1 => records[0]
                .get("eventName")
                .and_then(JsonValue::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| MULTI_TRIGGER_NAME.to_owned()),
            _ => MULTI_TRIGGER_NAME.to_owned(),
        }
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Server
    }

    fn on_start(&self, request: &InvocationRequest) -> Result<Vec<KeyValue>, TriggerError> {
        let event: S3Event = serde_json::from_value(request.payload().clone()).map_err(
            |source| TriggerError::EventMismatch {
                expected: "S3Event",
                source,
            },
        )?;

        let mut attributes = vec![
            KeyValue::new(FAAS_TRIGGER, "datasource"),
            KeyValue::new(FAAS_TRIGGER_TYPE, "S3"),
        ];

        if event.records.len() == 1
            && let Ok(serialized) = serde_json::to_string(&event.records[0])
        {
            attributes.push(KeyValue::new(
                RPC_REQUEST_PAYLOAD,
                limited_payload(&serialized, self.payload_limit).to_string(),
            ));
        }

        Ok(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_runtime::Context as LambdaContext;
    use serde_json::json;

    fn s3_event() -> JsonValue {
        json!({
            "Records": [{
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "awsRegion": "eu-west-2",
                "eventTime": "2024-05-01T12:00:00.000Z",
                "eventName": "ObjectCreated:Put",
                "userIdentity": {"principalId": "AWS:AIDAEXAMPLE"},
                "requestParameters": {"sourceIPAddress": "203.0.113.7"},
                "responseElements": {"x-amz-request-id": "C3D13FE58DE4C810"},
                "s3": {
                    "s3SchemaVersion": "1.0",
                    "configurationId": "cfg",
                    "bucket": {
                        "name": "uploads",
                        "arn": "arn:aws:s3:::uploads"
                    },
                    "object": {
                        "key": "invoice.pdf",
                        "size": 1024
                    }
                }
            }]
        })
    }

    fn request(payload: JsonValue) -> InvocationRequest {
        InvocationRequest::new(payload, LambdaContext::default())
    }

    #[test]
    fn matches_s3_records() {
        let trigger = S3Trigger::new(51200);

        assert!(trigger.matches(&request(s3_event())));
        assert!(!trigger.matches(&request(json!({
            "Records": [{"eventSource": "aws:sqs"}]
        }))));
    }

    #[test]
    fn single_record_is_named_after_the_event() {
        let trigger = S3Trigger::new(51200);
        assert_eq!(trigger.span_name(&request(s3_event())), "ObjectCreated:Put");
        assert_eq!(trigger.span_kind(), SpanKind::Server);
    }

    #[test]
    fn multi_record_batches_use_the_fixed_name() {
        let trigger = S3Trigger::new(51200);
        let mut payload = s3_event();
        let record = payload["Records"][0].clone();
        payload["Records"].as_array_mut().unwrap().push(record);

        assert_eq!(trigger.span_name(&request(payload)), "s3 multi trigger");
    }

    #[test]
    fn start_attributes_carry_the_record_payload() {
        let trigger = S3Trigger::new(51200);
        let attributes = trigger.on_start(&request(s3_event())).unwrap();

        assert!(attributes.iter().any(|kv| {
            kv.key.as_str() == FAAS_TRIGGER && kv.value.as_str() == "datasource"
        }));
        let payload = attributes
            .iter()
            .find(|kv| kv.key.as_str() == RPC_REQUEST_PAYLOAD)
            .expect("record payload attribute");
        assert!(payload.value.as_str().contains("uploads"));
    }
}
