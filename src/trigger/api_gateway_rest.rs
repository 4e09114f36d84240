//! API Gateway REST API (payload format v1) trigger.

use crate::attrs::{
    FAAS_TRIGGER_TYPE, HTTP_REQUEST_BODY, HTTP_REQUEST_HEADER_PREFIX,
    HTTP_REQUEST_PARAMETERS_PREFIX, HTTP_REQUEST_QUERY_PREFIX, HTTP_RESPONSE_BODY,
};
use crate::error::TriggerError;
use crate::request::InvocationRequest;
use crate::trigger::{
    Trigger, attribute_safe_name, http_status_code, limited_payload, multi_value_attribute,
    parse_gateway_response,
};
use opentelemetry::KeyValue;
use opentelemetry::trace::{SpanKind, Status};
use opentelemetry_semantic_conventions::attribute::{
    CLIENT_ADDRESS, FAAS_TRIGGER, HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, HTTP_ROUTE,
    SERVER_ADDRESS, URL_FULL, URL_SCHEME, USER_AGENT_ORIGINAL,
};
use serde_json::Value as JsonValue;

/// Trigger for API Gateway REST API proxy events.
///
/// Matched structurally by the presence of both `requestContext` and
/// `resource` at the top level; the trigger span is named after the matched
/// resource route. Attributes are read straight off the raw payload so that
/// a sparse event still contributes everything it does carry; the payload is
/// parsed with key order preserved, so multi-valued attributes and the
/// reconstructed URL keep document order.
pub struct ApiGatewayRestTrigger {
    payload_limit: usize,
}

impl ApiGatewayRestTrigger {
    /// Creates the trigger with the configured payload byte limit.
    pub fn new(payload_limit: usize) -> Self {
        Self { payload_limit }
    }
}

impl Trigger for ApiGatewayRestTrigger {
    fn name(&self) -> &'static str {
        "api-gateway-rest"
    }

    fn matches(&self, request: &InvocationRequest) -> bool {
        let payload = request.payload();
        payload.get("requestContext").is_some() && payload.get("resource").is_some()
    }

    fn span_name(&self, request: &InvocationRequest) -> String {
        request
            .payload()
            .get("resource")
            .and_then(JsonValue::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| request.function_name().to_owned())
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Server
    }

    fn on_start(&self, request: &InvocationRequest) -> Result<Vec<KeyValue>, TriggerError> {
        let payload = request.payload();
        let request_context = payload.get("requestContext");

        let mut attributes = vec![
            KeyValue::new(FAAS_TRIGGER, "http"),
            KeyValue::new(FAAS_TRIGGER_TYPE, "Api Gateway Rest"),
        ];

        // The request context carries the authoritative method; the
        // top-level field is a convenience copy that sparse events omit.
        if let Some(method) = request_context
            .and_then(|cx| cx.get("httpMethod"))
            .or_else(|| payload.get("httpMethod"))
            .and_then(JsonValue::as_str)
        {
            attributes.push(KeyValue::new(HTTP_REQUEST_METHOD, method.to_string()));
        }

        if let Some(route) = request_context
            .and_then(|cx| cx.get("resourcePath"))
            .or_else(|| payload.get("resource"))
            .and_then(JsonValue::as_str)
        {
            attributes.push(KeyValue::new(HTTP_ROUTE, route.to_string()));
        }

        let scheme = request.header("x-forwarded-proto").unwrap_or("https");
        attributes.push(KeyValue::new(URL_SCHEME, scheme.to_string()));

        if let Some(host) = request.header("host") {
            attributes.push(KeyValue::new(SERVER_ADDRESS, host.to_string()));

            let path = payload.get("path").and_then(JsonValue::as_str).unwrap_or("/");
            let mut url = format!("{scheme}://{host}{path}");
            if let Some(query) = encoded_query(payload) {
                url.push('?');
                url.push_str(&query);
            }
            attributes.push(KeyValue::new(URL_FULL, url));
        }

        if let Some(source_ip) = request_context
            .and_then(|cx| cx.get("identity"))
            .and_then(|identity| identity.get("sourceIp"))
            .and_then(JsonValue::as_str)
        {
            attributes.push(KeyValue::new(CLIENT_ADDRESS, source_ip.to_string()));
        }

        if let Some(user_agent) = request.header("user-agent") {
            attributes.push(KeyValue::new(USER_AGENT_ORIGINAL, user_agent.to_string()));
        }

        if let Some(body) = payload.get("body").and_then(JsonValue::as_str) {
            attributes.push(KeyValue::new(
                HTTP_REQUEST_BODY,
                limited_payload(body, self.payload_limit).to_string(),
            ));
        }

        match payload.get("multiValueHeaders").and_then(JsonValue::as_object) {
            Some(headers) if !headers.is_empty() => {
                for (name, values) in headers {
                    let values: Vec<String> = values
                        .as_array()
                        .map(|values| {
                            values
                                .iter()
                                .filter_map(JsonValue::as_str)
                                .map(str::to_owned)
                                .collect()
                        })
                        .unwrap_or_default();
                    let key =
                        format!("{HTTP_REQUEST_HEADER_PREFIX}{}", attribute_safe_name(name));
                    attributes.extend(multi_value_attribute(key, values));
                }
            }
            _ => {
                if let Some(headers) = payload.get("headers").and_then(JsonValue::as_object) {
                    for (name, value) in headers {
                        if let Some(value) = value.as_str() {
                            attributes.push(KeyValue::new(
                                format!(
                                    "{HTTP_REQUEST_HEADER_PREFIX}{}",
                                    attribute_safe_name(name)
                                ),
                                value.to_string(),
                            ));
                        }
                    }
                }
            }
        }

        match payload
            .get("multiValueQueryStringParameters")
            .and_then(JsonValue::as_object)
        {
            Some(params) if !params.is_empty() => {
                for (name, values) in params {
                    let values: Vec<String> = values
                        .as_array()
                        .map(|values| {
                            values
                                .iter()
                                .filter_map(JsonValue::as_str)
                                .map(str::to_owned)
                                .collect()
                        })
                        .unwrap_or_default();
                    let key =
                        format!("{HTTP_REQUEST_QUERY_PREFIX}{}", attribute_safe_name(name));
                    attributes.extend(multi_value_attribute(key, values));
                }
            }
            _ => {
                if let Some(params) = payload
                    .get("queryStringParameters")
                    .and_then(JsonValue::as_object)
                {
                    for (name, value) in params {
                        if let Some(value) = value.as_str() {
                            attributes.push(KeyValue::new(
                                format!(
                                    "{HTTP_REQUEST_QUERY_PREFIX}{}",
                                    attribute_safe_name(name)
                                ),
                                value.to_string(),
                            ));
                        }
                    }
                }
            }
        }

        if let Some(params) = payload.get("pathParameters").and_then(JsonValue::as_object) {
            for (name, value) in params {
                if let Some(value) = value.as_str() {
                    attributes.push(KeyValue::new(
                        format!(
                            "{HTTP_REQUEST_PARAMETERS_PREFIX}{}",
                            attribute_safe_name(name)
                        ),
                        value.to_string(),
                    ));
                }
            }
        }

        Ok(attributes)
    }

    fn on_end(
        &self,
        _request: &InvocationRequest,
        response: Option<&JsonValue>,
        _error: Option<&str>,
    ) -> Result<Vec<KeyValue>, TriggerError> {
        let Some(response) = response else {
            return Ok(Vec::new());
        };

        let response = parse_gateway_response(response, "ApiGatewayProxyResponse")?;

        let mut attributes = Vec::new();
        if let Some(code) = response.status_code {
            attributes.push(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, code));
        }
        if let Some(ref body) = response.body {
            attributes.push(KeyValue::new(
                HTTP_RESPONSE_BODY,
                limited_payload(body, self.payload_limit).to_string(),
            ));
        }

        Ok(attributes)
    }

    fn status(
        &self,
        _request: &InvocationRequest,
        response: Option<&JsonValue>,
        error: Option<&str>,
    ) -> Status {
        http_span_status(response, error)
    }
}

/// Status shared by the gateway triggers: error on a handler fault or a
/// 4xx/5xx status code, unset otherwise.
pub(crate) fn http_span_status(response: Option<&JsonValue>, error: Option<&str>) -> Status {
    if let Some(message) = error {
        return Status::error(message.to_string());
    }
    match response.and_then(http_status_code) {
        Some(code) if (400..600).contains(&code) => Status::error(format!("HTTP {code}")),
        _ => Status::Unset,
    }
}

/// Rebuilds the query string in the payload's own key order.
fn encoded_query(payload: &JsonValue) -> Option<String> {
    let mut parts = Vec::new();

    match payload
        .get("multiValueQueryStringParameters")
        .and_then(JsonValue::as_object)
    {
        Some(params) if !params.is_empty() => {
            for (key, values) in params {
                for value in values
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(JsonValue::as_str)
                {
                    parts.push(format!(
                        "{}={}",
                        urlencoding::encode(key),
                        urlencoding::encode(value)
                    ));
                }
            }
        }
        _ => {
            if let Some(params) = payload
                .get("queryStringParameters")
                .and_then(JsonValue::as_object)
            {
                for (key, value) in params {
                    if let Some(value) = value.as_str() {
                        parts.push(format!(
                            "{}={}",
                            urlencoding::encode(key),
                            urlencoding::encode(value)
                        ));
                    }
                }
            }
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_runtime::Context as LambdaContext;
    use opentelemetry::Value;
    use serde_json::json;

    fn rest_event() -> JsonValue {
        json!({
            "resource": "/orders/{id}",
            "path": "/orders/42",
            "httpMethod": "POST",
            "headers": {
                "Host": "api.example.com",
                "X-Forwarded-Proto": "https",
                "User-Agent": "curl/8.0",
                "traceparent": "00-5759e988bd862e3fe1be46a994272793-53995c3f42cd8ad8-01"
            },
            "multiValueHeaders": {
                "Accept": ["application/json", "text/plain"],
                "Host": ["api.example.com"]
            },
            "queryStringParameters": {"verbose": "true"},
            "multiValueQueryStringParameters": {"verbose": ["true"], "tag": ["a", "b"]},
            "pathParameters": {"id": "42"},
            "requestContext": {
                "resourcePath": "/orders/{id}",
                "httpMethod": "POST",
                "identity": {"sourceIp": "203.0.113.7"}
            },
            "body": "{\"item\":\"book\"}"
        })
    }

    fn request(payload: JsonValue) -> InvocationRequest {
        InvocationRequest::new(payload, LambdaContext::default())
    }

    fn find<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a Value> {
        attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    #[test]
    fn matches_rest_shape_only() {
        let trigger = ApiGatewayRestTrigger::new(51200);

        assert!(trigger.matches(&request(rest_event())));
        assert!(!trigger.matches(&request(json!({"Records": []}))));
        // HTTP API v2 has requestContext but no resource.
        assert!(!trigger.matches(&request(json!({
            "requestContext": {}, "routeKey": "GET /x"
        }))));
    }

    #[test]
    fn span_name_is_the_resource_route() {
        let trigger = ApiGatewayRestTrigger::new(51200);
        assert_eq!(trigger.span_name(&request(rest_event())), "/orders/{id}");
        assert_eq!(trigger.span_kind(), SpanKind::Server);
    }

    #[test]
    fn start_attributes_cover_request_shape() {
        let trigger = ApiGatewayRestTrigger::new(51200);
        let attributes = trigger.on_start(&request(rest_event())).unwrap();

        assert_eq!(
            find(&attributes, HTTP_REQUEST_METHOD),
            Some(&Value::from("POST".to_string()))
        );
        assert_eq!(
            find(&attributes, HTTP_ROUTE),
            Some(&Value::from("/orders/{id}".to_string()))
        );
        assert_eq!(
            find(&attributes, URL_FULL),
            Some(&Value::from(
                "https://api.example.com/orders/42?verbose=true&tag=a&tag=b".to_string()
            ))
        );
        assert_eq!(
            find(&attributes, CLIENT_ADDRESS),
            Some(&Value::from("203.0.113.7".to_string()))
        );
        assert_eq!(
            find(&attributes, HTTP_REQUEST_BODY),
            Some(&Value::from("{\"item\":\"book\"}".to_string()))
        );
        assert_eq!(
            find(&attributes, "http.request.parameters.id"),
            Some(&Value::from("42".to_string()))
        );
        // One value: scalar.
        assert_eq!(
            find(&attributes, "http.request.query.verbose"),
            Some(&Value::from("true".to_string()))
        );
        // Several values: ordered array.
        match find(&attributes, "http.request.query.tag") {
            Some(Value::Array(opentelemetry::Array::String(values))) => {
                assert_eq!(values.len(), 2);
            }
            other => panic!("expected array, got {other:?}"),
        }
        // Header names are attribute-safe.
        match find(&attributes, "http.request.header.accept") {
            Some(Value::Array(opentelemetry::Array::String(values))) => {
                assert_eq!(values.len(), 2);
            }
            other => panic!("expected array, got {other:?}"),
        }
        assert_eq!(
            find(&attributes, "http.request.header.host"),
            Some(&Value::from("api.example.com".to_string()))
        );
    }

    #[test]
    fn method_comes_from_the_request_context() {
        let trigger = ApiGatewayRestTrigger::new(51200);

        // Sparse canonical payload: method only inside requestContext.
        let payload = json!({
            "resource": "/orders",
            "requestContext": {"httpMethod": "POST", "identity": {}}
        });
        let attributes = trigger.on_start(&request(payload)).unwrap();
        assert_eq!(
            find(&attributes, HTTP_REQUEST_METHOD),
            Some(&Value::from("POST".to_string()))
        );
        assert_eq!(
            find(&attributes, HTTP_ROUTE),
            Some(&Value::from("/orders".to_string()))
        );

        // The request context wins over the top-level convenience copy.
        let payload = json!({
            "resource": "/orders",
            "httpMethod": "GET",
            "requestContext": {"httpMethod": "POST"}
        });
        let attributes = trigger.on_start(&request(payload)).unwrap();
        assert_eq!(
            find(&attributes, HTTP_REQUEST_METHOD),
            Some(&Value::from("POST".to_string()))
        );
    }

    #[test]
    fn sparse_payload_still_yields_attributes() {
        let trigger = ApiGatewayRestTrigger::new(51200);
        let payload = json!({"resource": "/ping", "requestContext": {}});

        let attributes = trigger.on_start(&request(payload)).unwrap();

        assert_eq!(
            find(&attributes, FAAS_TRIGGER),
            Some(&Value::from("http".to_string()))
        );
        assert_eq!(
            find(&attributes, HTTP_ROUTE),
            Some(&Value::from("/ping".to_string()))
        );
        assert!(find(&attributes, HTTP_REQUEST_METHOD).is_none());
    }

    #[test]
    fn url_query_follows_payload_order() {
        let trigger = ApiGatewayRestTrigger::new(51200);
        let payload = json!({
            "resource": "/x",
            "path": "/x",
            "headers": {"Host": "api.example.com"},
            "multiValueQueryStringParameters": {"b": ["2"], "a": ["1"], "c": ["3"]},
            "requestContext": {"httpMethod": "GET"}
        });

        let attributes = trigger.on_start(&request(payload)).unwrap();
        assert_eq!(
            find(&attributes, URL_FULL),
            Some(&Value::from(
                "https://api.example.com/x?b=2&a=1&c=3".to_string()
            ))
        );
    }

    #[test]
    fn body_is_truncated_to_the_byte_limit() {
        let trigger = ApiGatewayRestTrigger::new(4);
        let mut payload = rest_event();
        payload["body"] = json!("abcdefgh");

        let attributes = trigger.on_start(&request(payload)).unwrap();
        assert_eq!(
            find(&attributes, HTTP_REQUEST_BODY),
            Some(&Value::from("abcd".to_string()))
        );
    }

    #[test]
    fn end_attributes_capture_status_and_body() {
        let trigger = ApiGatewayRestTrigger::new(51200);
        let response = json!({"statusCode": 201, "body": "created"});

        let attributes = trigger
            .on_end(&request(rest_event()), Some(&response), None)
            .unwrap();

        assert_eq!(
            find(&attributes, HTTP_RESPONSE_STATUS_CODE),
            Some(&Value::I64(201))
        );
        assert_eq!(
            find(&attributes, HTTP_RESPONSE_BODY),
            Some(&Value::from("created".to_string()))
        );
    }

    #[test]
    fn unrecognised_response_is_a_mismatch() {
        let trigger = ApiGatewayRestTrigger::new(51200);
        let response = json!(["not", "a", "response"]);

        let result = trigger.on_end(&request(rest_event()), Some(&response), None);
        assert!(matches!(
            result,
            Err(TriggerError::ResponseMismatch { .. })
        ));
    }

    #[test]
    fn status_boundaries() {
        let trigger = ApiGatewayRestTrigger::new(51200);
        let req = request(rest_event());

        let status_for = |code: i64| {
            trigger.status(&req, Some(&json!({"statusCode": code})), None)
        };

        assert_eq!(status_for(200), Status::Unset);
        assert_eq!(status_for(399), Status::Unset);
        assert!(matches!(status_for(400), Status::Error { .. }));
        assert!(matches!(status_for(599), Status::Error { .. }));
        assert_eq!(status_for(600), Status::Unset);
        assert!(matches!(
            trigger.status(&req, None, Some("boom")),
            Status::Error { .. }
        ));
    }
}
