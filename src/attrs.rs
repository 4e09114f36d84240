//! Attribute keys and values specific to Lambda invocation correlation.
//!
//! Standard semantic-convention keys come from
//! `opentelemetry-semantic-conventions`; this module holds only the keys that
//! have no upstream equivalent.

/// Role of a span within one invocation: `"trigger"`, `"function"` or
/// `"message"`.
pub const SPAN_ROLE: &str = "lambda.internal.span.role";

/// Lifecycle marker carried by early span clones.
pub const SPAN_LIFECYCLE: &str = "lambda.internal.span.lifecycle";

/// Span id of the live span an early clone was derived from.
pub const ORIGINAL_SPAN_ID: &str = "lambda.internal.span.id";

/// Trace id of the live span an early clone was derived from.
pub const ORIGINAL_TRACE_ID: &str = "lambda.internal.trace.id";

/// Value of [`SPAN_LIFECYCLE`] on early span clones.
pub const LIFECYCLE_EARLY: &str = "early";

/// [`SPAN_ROLE`] value for the trigger span.
pub const ROLE_TRIGGER: &str = "trigger";

/// [`SPAN_ROLE`] value for the function span.
pub const ROLE_FUNCTION: &str = "function";

/// [`SPAN_ROLE`] value for per-record message spans.
pub const ROLE_MESSAGE: &str = "message";

/// Human-readable trigger kind, e.g. `"Api Gateway Rest"`.
pub const FAAS_TRIGGER_TYPE: &str = "faas.trigger.type";

/// Truncated HTTP request body.
pub const HTTP_REQUEST_BODY: &str = "http.request.body";

/// Truncated HTTP response body.
pub const HTTP_RESPONSE_BODY: &str = "http.response.body";

/// Truncated serialized payload for non-HTTP triggers.
pub const RPC_REQUEST_PAYLOAD: &str = "rpc.request.payload";

/// Prefix for per-header request attributes.
pub const HTTP_REQUEST_HEADER_PREFIX: &str = "http.request.header.";

/// Prefix for per-parameter query string attributes.
pub const HTTP_REQUEST_QUERY_PREFIX: &str = "http.request.query.";

/// Prefix for per-parameter path attributes.
pub const HTTP_REQUEST_PARAMETERS_PREFIX: &str = "http.request.parameters.";
