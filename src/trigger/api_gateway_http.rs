//! API Gateway HTTP API (payload format v2) trigger.

use crate::attrs::{
    FAAS_TRIGGER_TYPE, HTTP_REQUEST_BODY, HTTP_REQUEST_HEADER_PREFIX,
    HTTP_REQUEST_PARAMETERS_PREFIX, HTTP_REQUEST_QUERY_PREFIX, HTTP_RESPONSE_BODY,
};
use crate::error::TriggerError;
use crate::request::InvocationRequest;
use crate::trigger::api_gateway_rest::http_span_status;
use crate::trigger::{Trigger, attribute_safe_name, limited_payload, parse_gateway_response};
use aws_lambda_events::apigw::ApiGatewayV2httpRequest;
use opentelemetry::KeyValue;
use opentelemetry::trace::{SpanKind, Status};
use opentelemetry_semantic_conventions::attribute::{
    CLIENT_ADDRESS, FAAS_TRIGGER, HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, HTTP_ROUTE,
    SERVER_ADDRESS, URL_FULL, URL_SCHEME, USER_AGENT_ORIGINAL,
};
use serde_json::Value as JsonValue;

/// Trigger for API Gateway HTTP API events (payload format v2).
///
/// Matched structurally by the presence of `requestContext` and `routeKey`.
/// The v2 format joins repeated headers and query parameters with commas, so
/// per-field attributes are always scalar.
pub struct ApiGatewayHttpTrigger {
    payload_limit: usize,
}

impl ApiGatewayHttpTrigger {
    /// Creates the trigger with the configured payload byte limit.
    pub fn new(payload_limit: usize) -> Self {
        Self { payload_limit }
    }
}

/// The route part of a v2 route key, e.g. `"GET /users/{id}"` -> `"/users/{id}"`.
fn route_from_key(route_key: &str) -> &str {
    match route_key.split_once(' ') {
        Some((_, route)) => route,
        None => route_key,
    }
}

impl Trigger for ApiGatewayHttpTrigger {
    fn name(&self) -> &'static str {
        "api-gateway-http"
    }

    fn matches(&self, request: &InvocationRequest) -> bool {
        let payload = request.payload();
        payload.get("requestContext").is_some() && payload.get("routeKey").is_some()
    }

    fn span_name(&self, request: &InvocationRequest) -> String {
        request
            .payload()
            .get("routeKey")
            .and_then(JsonValue::as_str)
            .map(|key| route_from_key(key).to_owned())
            .unwrap_or_else(|| request.function_name().to_owned())
    }

    fn span_kind(&self) -> SpanKind {
        SpanKind::Server
    }

    fn on_start(&self, request: &InvocationRequest) -> Result<Vec<KeyValue>, TriggerError> {
        let event: ApiGatewayV2httpRequest = serde_json::from_value(request.payload().clone())
            .map_err(|source| TriggerError::EventMismatch {
                expected: "ApiGatewayV2httpRequest",
                source,
            })?;

        let mut attributes = vec![
            KeyValue::new(FAAS_TRIGGER, "http"),
            KeyValue::new(FAAS_TRIGGER_TYPE, "Api Gateway HTTP"),
            KeyValue::new(
                HTTP_REQUEST_METHOD,
                event.request_context.http.method.as_str().to_string(),
            ),
        ];

        if let Some(ref route_key) = event.route_key {
            attributes.push(KeyValue::new(
                HTTP_ROUTE,
                route_from_key(route_key).to_string(),
            ));
        }

        let scheme = request.header("x-forwarded-proto").unwrap_or("https");
        attributes.push(KeyValue::new(URL_SCHEME, scheme.to_string()));

        if let Some(host) = request.header("host") {
            attributes.push(KeyValue::new(SERVER_ADDRESS, host.to_string()));

            let path = event.raw_path.as_deref().unwrap_or("/");
            let mut url = format!("{scheme}://{host}{path}");
            if let Some(ref query) = event.raw_query_string
                && !query.is_empty()
            {
                url.push('?');
                url.push_str(query);
            }
            attributes.push(KeyValue::new(URL_FULL, url));
        }

        if let Some(ref source_ip) = event.request_context.http.source_ip {
            attributes.push(KeyValue::new(CLIENT_ADDRESS, source_ip.to_string()));
        }

        if let Some(user_agent) = request.header("user-agent") {
            attributes.push(KeyValue::new(USER_AGENT_ORIGINAL, user_agent.to_string()));
        }

        if let Some(ref body) = event.body {
            attributes.push(KeyValue::new(
                HTTP_REQUEST_BODY,
                limited_payload(body, self.payload_limit).to_string(),
            ));
        }

        for (name, value) in event.headers.iter() {
            if let Ok(value) = value.to_str() {
                attributes.push(KeyValue::new(
                    format!(
                        "{HTTP_REQUEST_HEADER_PREFIX}{}",
                        attribute_safe_name(name.as_str())
                    ),
                    value.to_string(),
                ));
            }
        }

        for (name, value) in event.query_string_parameters.iter() {
            attributes.push(KeyValue::new(
                format!("{HTTP_REQUEST_QUERY_PREFIX}{}", attribute_safe_name(name)),
                value.to_string(),
            ));
        }

        for (name, value) in &event.path_parameters {
            attributes.push(KeyValue::new(
                format!(
                    "{HTTP_REQUEST_PARAMETERS_PREFIX}{}",
                    attribute_safe_name(name)
                ),
                value.to_string(),
            ));
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

        let response = parse_gateway_response(response, "ApiGatewayV2httpResponse")?;

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
