//! Ordered, fail-safe trigger registry.

use crate::config::TriggerKind;
use crate::request::InvocationRequest;
use crate::trigger::api_gateway_http::ApiGatewayHttpTrigger;
use crate::trigger::api_gateway_rest::ApiGatewayRestTrigger;
use crate::trigger::kinesis::KinesisTrigger;
use crate::trigger::s3::S3Trigger;
use crate::trigger::sqs::SqsTrigger;
use crate::trigger::Trigger;

/// Immutable, ordered collection of trigger classifiers.
///
/// Built once at startup and shared across concurrent invocations.
/// Dispatch precedence is registration order: [`match_for_request`] scans the
/// triggers in the order they were registered and the first satisfied
/// predicate wins, even when a later predicate would also match.
///
/// [`match_for_request`]: TriggerRegistry::match_for_request
pub struct TriggerRegistry {
    triggers: Vec<Box<dyn Trigger>>,
}

impl TriggerRegistry {
    /// Builds the registry from the configured trigger kinds, in order.
    pub fn new(kinds: &[TriggerKind], payload_limit: usize) -> Self {
        let triggers = kinds
            .iter()
            .map(|kind| build_trigger(*kind, payload_limit))
            .collect();
        Self { triggers }
    }

    /// Classifies a request, returning the first matching trigger and its
    /// registration index. `None` means the payload matched no known shape
    /// and the invocation proceeds without a trigger span.
    pub fn match_for_request(
        &self,
        request: &InvocationRequest,
    ) -> Option<(usize, &dyn Trigger)> {
        self.triggers
            .iter()
            .enumerate()
            .find(|(_, trigger)| trigger.matches(request))
            .map(|(index, trigger)| (index, trigger.as_ref()))
    }

    /// The trigger registered at `index`.
    pub(crate) fn trigger_at(&self, index: usize) -> Option<&dyn Trigger> {
        self.triggers.get(index).map(Box::as_ref)
    }

    /// Number of registered triggers.
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

fn build_trigger(kind: TriggerKind, payload_limit: usize) -> Box<dyn Trigger> {
    match kind {
        TriggerKind::ApiGatewayRest => Box::new(ApiGatewayRestTrigger::new(payload_limit)),
        TriggerKind::ApiGatewayHttp => Box::new(ApiGatewayHttpTrigger::new(payload_limit)),
        TriggerKind::S3 => Box::new(S3Trigger::new(payload_limit)),
        TriggerKind::Sqs => Box::new(SqsTrigger::new(payload_limit)),
        TriggerKind::Kinesis => Box::new(KinesisTrigger::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorrelationConfig;
    use lambda_runtime::Context as LambdaContext;
    use serde_json::{Value as JsonValue, json};

    fn default_registry() -> TriggerRegistry {
        let config = CorrelationConfig::default();
        TriggerRegistry::new(&config.triggers, config.payload_size_limit)
    }

    fn request(payload: JsonValue) -> InvocationRequest {
        InvocationRequest::new(payload, LambdaContext::default())
    }

    #[test]
    fn default_registry_has_all_kinds() {
        let registry = default_registry();
        assert_eq!(registry.len(), 5);
        assert!(!registry.is_empty());
    }

    #[test]
    fn dispatches_by_shape() {
        let registry = default_registry();

        let rest = request(json!({"requestContext": {}, "resource": "/x"}));
        assert_eq!(registry.match_for_request(&rest).unwrap().1.name(), "api-gateway-rest");

        let sqs = request(json!({"Records": [{"eventSource": "aws:sqs"}]}));
        assert_eq!(registry.match_for_request(&sqs).unwrap().1.name(), "sqs");

        let unknown = request(json!({"detail": {}}));
        assert!(registry.match_for_request(&unknown).is_none());
    }

    #[test]
    fn registration_order_decides_ambiguous_payloads() {
        // Shape satisfying both gateway predicates.
        let ambiguous = json!({"requestContext": {}, "resource": "/x", "routeKey": "GET /x"});

        let rest_first = TriggerRegistry::new(
            &[TriggerKind::ApiGatewayRest, TriggerKind::ApiGatewayHttp],
            51200,
        );
        let (index, trigger) = rest_first
            .match_for_request(&request(ambiguous.clone()))
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(trigger.name(), "api-gateway-rest");

        let http_first = TriggerRegistry::new(
            &[TriggerKind::ApiGatewayHttp, TriggerKind::ApiGatewayRest],
            51200,
        );
        let (index, trigger) = http_first.match_for_request(&request(ambiguous)).unwrap();
        assert_eq!(index, 0);
        assert_eq!(trigger.name(), "api-gateway-http");
    }

    #[test]
    fn restricted_registry_ignores_other_shapes() {
        let registry = TriggerRegistry::new(&[TriggerKind::Sqs], 51200);

        let rest = request(json!({"requestContext": {}, "resource": "/x"}));
        assert!(registry.match_for_request(&rest).is_none());
    }
}
