//! Span instrumenters for the trigger, function and message roles.
//!
//! Each instrumenter opens spans through the global tracer and keeps a
//! snapshot of the start state (name, kind, attributes, links) alongside the
//! live context handle. The snapshot is what the early emitter rebuilds
//! clones from, since a live span's attributes cannot be read back.

use crate::attrs::{ROLE_FUNCTION, ROLE_MESSAGE, ROLE_TRIGGER, SPAN_ROLE};
use crate::cold_start::check_cold_start;
use crate::request::InvocationRequest;
use crate::trigger::{MessageSpanSpec, Trigger};
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{Link, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_semantic_conventions::attribute::{
    CLOUD_ACCOUNT_ID, CLOUD_PROVIDER, CLOUD_REGION, CLOUD_RESOURCE_ID, ERROR_MESSAGE,
    FAAS_COLDSTART, FAAS_INVOCATION_ID, FAAS_MAX_MEMORY, FAAS_NAME, FAAS_VERSION,
};
use serde_json::Value as JsonValue;

use crate::SCOPE_NAME;

/// Decides once per invocation whether instrumentation runs at all.
///
/// A rejected invocation opens no spans and runs the handler fully
/// uninstrumented; the decision is never revisited mid-invocation.
pub trait InvocationGate: Send + Sync {
    /// Returns `false` to suppress instrumentation for this invocation.
    fn should_start(&self, parent: &Context, request: &InvocationRequest) -> bool;
}

/// Gate that instruments every invocation. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysStart;

impl InvocationGate for AlwaysStart {
    fn should_start(&self, _parent: &Context, _request: &InvocationRequest) -> bool {
        true
    }
}

/// Adapter turning a closure into an [`InvocationGate`].
///
/// Built with [`gate_fn`].
pub struct GateFn<F> {
    f: F,
}

/// Wraps a closure as an [`InvocationGate`].
pub fn gate_fn<F>(f: F) -> GateFn<F>
where
    F: Fn(&Context, &InvocationRequest) -> bool + Send + Sync,
{
    GateFn { f }
}

impl<F> InvocationGate for GateFn<F>
where
    F: Fn(&Context, &InvocationRequest) -> bool + Send + Sync,
{
    fn should_start(&self, parent: &Context, request: &InvocationRequest) -> bool {
        (self.f)(parent, request)
    }
}

/// A live span handle plus the snapshot it was started from.
pub(crate) struct StartedSpan {
    pub(crate) cx: Context,
    pub(crate) name: String,
    pub(crate) kind: SpanKind,
    pub(crate) attributes: Vec<KeyValue>,
    pub(crate) links: Vec<Link>,
}

fn start_span(
    tracer: &BoxedTracer,
    parent: &Context,
    name: String,
    kind: SpanKind,
    attributes: Vec<KeyValue>,
    links: Vec<Link>,
) -> StartedSpan {
    let mut builder = tracer
        .span_builder(name.clone())
        .with_kind(kind.clone())
        .with_attributes(attributes.clone());
    if !links.is_empty() {
        builder = builder.with_links(links.clone());
    }
    let span = builder.start_with_context(tracer, parent);

    StartedSpan {
        cx: parent.with_span(span),
        name,
        kind,
        attributes,
        links,
    }
}

/// Opens and closes the function span.
pub(crate) struct FunctionInstrumenter {
    tracer: BoxedTracer,
}

impl FunctionInstrumenter {
    pub(crate) fn new() -> Self {
        Self {
            tracer: global::tracer(SCOPE_NAME),
        }
    }

    pub(crate) fn start(&self, parent: &Context, request: &InvocationRequest) -> StartedSpan {
        let lambda_ctx = request.lambda_context();
        let arn = request.invoked_function_arn();

        let mut attributes = vec![
            KeyValue::new(SPAN_ROLE, ROLE_FUNCTION),
            KeyValue::new(CLOUD_PROVIDER, "aws"),
            KeyValue::new(FAAS_INVOCATION_ID, request.request_id().to_string()),
            KeyValue::new(FAAS_NAME, request.function_name().to_string()),
            KeyValue::new(FAAS_VERSION, lambda_ctx.env_config.version.clone()),
            KeyValue::new(
                FAAS_MAX_MEMORY,
                lambda_ctx.env_config.memory as i64 * 1024 * 1024,
            ),
            KeyValue::new(FAAS_COLDSTART, check_cold_start()),
            KeyValue::new(CLOUD_RESOURCE_ID, arn.to_string()),
        ];

        if let Ok(region) = std::env::var("AWS_REGION") {
            attributes.push(KeyValue::new(CLOUD_REGION, region));
        }
        if let Some(account_id) = arn.split(':').nth(4)
            && !account_id.is_empty()
        {
            attributes.push(KeyValue::new(CLOUD_ACCOUNT_ID, account_id.to_string()));
        }

        start_span(
            &self.tracer,
            parent,
            request.function_name().to_string(),
            SpanKind::Server,
            attributes,
            Vec::new(),
        )
    }

    pub(crate) fn end(&self, started: StartedSpan, error: Option<&str>) {
        let span = started.cx.span();
        if let Some(message) = error {
            span.set_attribute(KeyValue::new(ERROR_MESSAGE, message.to_string()));
            span.set_status(Status::error(message.to_string()));
        }
        span.end();
    }
}

/// Opens and closes the trigger span, containing extractor faults.
pub(crate) struct TriggerInstrumenter {
    tracer: BoxedTracer,
}

impl TriggerInstrumenter {
    pub(crate) fn new() -> Self {
        Self {
            tracer: global::tracer(SCOPE_NAME),
        }
    }

    pub(crate) fn start(
        &self,
        parent: &Context,
        trigger: &dyn Trigger,
        request: &InvocationRequest,
    ) -> StartedSpan {
        let mut attributes = vec![KeyValue::new(SPAN_ROLE, ROLE_TRIGGER)];
        match trigger.on_start(request) {
            Ok(extracted) => attributes.extend(extracted),
            Err(error) => {
                tracing::warn!(
                    target: "lambda_correlation",
                    trigger = trigger.name(),
                    %error,
                    "trigger start attributes skipped"
                );
            }
        }

        start_span(
            &self.tracer,
            parent,
            trigger.span_name(request),
            trigger.span_kind(),
            attributes,
            trigger.links(request),
        )
    }

    pub(crate) fn end(
        &self,
        started: StartedSpan,
        trigger: &dyn Trigger,
        request: &InvocationRequest,
        response: Option<&JsonValue>,
        error: Option<&str>,
    ) {
        let span = started.cx.span();
        match trigger.on_end(request, response, error) {
            Ok(extracted) => {
                for attribute in extracted {
                    span.set_attribute(attribute);
                }
            }
            Err(error) => {
                tracing::warn!(
                    target: "lambda_correlation",
                    trigger = trigger.name(),
                    %error,
                    "trigger end attributes skipped"
                );
            }
        }
        span.set_status(trigger.status(request, response, error));
        span.end();
    }
}

/// Opens and closes per-record message spans for batch triggers.
pub(crate) struct MessageInstrumenter {
    tracer: BoxedTracer,
}

impl MessageInstrumenter {
    pub(crate) fn new() -> Self {
        Self {
            tracer: global::tracer(SCOPE_NAME),
        }
    }

    pub(crate) fn start_all(
        &self,
        parent: &Context,
        specs: Vec<MessageSpanSpec>,
    ) -> Vec<StartedSpan> {
        specs
            .into_iter()
            .map(|spec| {
                let mut attributes = spec.attributes;
                attributes.push(KeyValue::new(SPAN_ROLE, ROLE_MESSAGE));
                start_span(
                    &self.tracer,
                    parent,
                    spec.name,
                    SpanKind::Consumer,
                    attributes,
                    spec.links,
                )
            })
            .collect()
    }

    pub(crate) fn end_all(&self, spans: Vec<StartedSpan>, error: Option<&str>) {
        for started in spans {
            let span = started.cx.span();
            if let Some(message) = error {
                span.set_status(Status::error(message.to_string()));
            }
            span.end();
        }
    }
}
