//! Normalized view of a single Lambda invocation's input.

use lambda_runtime::Context as LambdaContext;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// One invocation's normalized, immutable input.
///
/// Wraps the raw JSON payload together with the Lambda runtime context and a
/// header map derived from the payload's top-level `headers` object with keys
/// lower-cased. When two differently-cased keys collide after normalization
/// the value appearing first in the payload wins.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    payload: JsonValue,
    context: LambdaContext,
    headers: HashMap<String, String>,
}

impl InvocationRequest {
    /// Builds a request from the raw event parts.
    pub fn new(payload: JsonValue, context: LambdaContext) -> Self {
        let headers = normalize_headers(&payload);
        Self {
            payload,
            context,
            headers,
        }
    }

    /// The raw event payload.
    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// The Lambda runtime context for this invocation.
    pub fn lambda_context(&self) -> &LambdaContext {
        &self.context
    }

    /// The function name from the execution environment.
    pub fn function_name(&self) -> &str {
        &self.context.env_config.function_name
    }

    /// The unique request id assigned by the Lambda runtime.
    pub fn request_id(&self) -> &str {
        &self.context.request_id
    }

    /// The ARN the function was invoked with.
    pub fn invoked_function_arn(&self) -> &str {
        &self.context.invoked_function_arn
    }

    /// The normalized (lower-cased, first value wins) header map.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Convenience lookup into the normalized header map.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The `custom` map of the Lambda client context, when the caller
    /// supplied one. Used as the secondary trace-context carrier.
    pub fn client_custom(&self) -> Option<&HashMap<String, String>> {
        self.context.client_context.as_ref().map(|cc| &cc.custom)
    }
}

/// Lower-cases header keys from the payload's `headers` object.
///
/// Non-string values are skipped. Duplicate keys after lower-casing keep the
/// first value in source-document order (the payload is parsed with key
/// order preserved).
fn normalize_headers(payload: &JsonValue) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    if let Some(object) = payload.get("headers").and_then(JsonValue::as_object) {
        for (key, value) in object {
            if let Some(value) = value.as_str() {
                headers
                    .entry(key.to_ascii_lowercase())
                    .or_insert_with(|| value.to_string());
            }
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn headers_are_lower_cased() {
        let payload = json!({
            "headers": {
                "Content-Type": "application/json",
                "X-Forwarded-Proto": "https"
            }
        });
        let request = InvocationRequest::new(payload, LambdaContext::default());

        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("X-Forwarded-Proto"), Some("https"));
        assert!(request.headers().keys().all(|k| k.chars().all(|c| !c.is_ascii_uppercase())));
    }

    #[test]
    fn first_value_wins_on_duplicate_keys() {
        // Raw JSON keeps both keys; parsing preserves document order.
        let payload: JsonValue =
            serde_json::from_str(r#"{"headers": {"Host": "first.example.com", "host": "second.example.com"}}"#)
                .unwrap();
        let request = InvocationRequest::new(payload, LambdaContext::default());

        assert_eq!(request.header("host"), Some("first.example.com"));
    }

    #[test]
    fn non_string_header_values_are_skipped() {
        let payload = json!({"headers": {"x-count": 3, "x-ok": "yes"}});
        let request = InvocationRequest::new(payload, LambdaContext::default());

        assert_eq!(request.header("x-count"), None);
        assert_eq!(request.header("x-ok"), Some("yes"));
    }

    #[test]
    fn missing_headers_object_yields_empty_map() {
        let payload = json!({"Records": []});
        let request = InvocationRequest::new(payload, LambdaContext::default());

        assert!(request.headers().is_empty());
        assert!(request.client_custom().is_none());
    }
}
