//! Early span emission for crash resilience.
//!
//! Lambda can freeze or kill the process before the normal end-of-invocation
//! flush, losing every open span. Immediately after the function span opens,
//! terminal clones of the open spans are emitted and flushed so that at
//! least a start-state record of the invocation survives a crash. Clones
//! carry the real span's trace and span ids so backends can de-duplicate
//! when the real spans arrive.

use crate::attrs::{LIFECYCLE_EARLY, ORIGINAL_SPAN_ID, ORIGINAL_TRACE_ID, SPAN_LIFECYCLE};
use crate::instrument::StartedSpan;
use crate::SCOPE_NAME;
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{Span, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

/// Emits terminal clones of the open spans.
pub(crate) struct EarlySpanEmitter {
    tracer: BoxedTracer,
}

impl EarlySpanEmitter {
    pub(crate) fn new() -> Self {
        Self {
            tracer: global::tracer(SCOPE_NAME),
        }
    }

    /// Clones the trigger span (when one exists) and the function span,
    /// preserving the live spans' parent chain.
    pub(crate) fn emit(
        &self,
        upstream: &Context,
        trigger: Option<&StartedSpan>,
        function: &StartedSpan,
    ) {
        if let Some(trigger) = trigger {
            self.emit_clone(upstream, trigger);
        }
        let function_parent = trigger.map(|t| &t.cx).unwrap_or(upstream);
        self.emit_clone(function_parent, function);
    }

    /// Starts and immediately ends a clone of a live span: same name, kind,
    /// attributes, links and parent, plus the lifecycle markers.
    fn emit_clone(&self, parent: &Context, live: &StartedSpan) {
        let live_span_context = live.cx.span().span_context().clone();

        let mut attributes = live.attributes.clone();
        attributes.push(KeyValue::new(SPAN_LIFECYCLE, LIFECYCLE_EARLY));
        attributes.push(KeyValue::new(
            ORIGINAL_SPAN_ID,
            live_span_context.span_id().to_string(),
        ));
        attributes.push(KeyValue::new(
            ORIGINAL_TRACE_ID,
            live_span_context.trace_id().to_string(),
        ));

        let mut builder = self
            .tracer
            .span_builder(live.name.clone())
            .with_kind(live.kind.clone())
            .with_attributes(attributes);
        if !live.links.is_empty() {
            builder = builder.with_links(live.links.clone());
        }

        let mut span = builder.start_with_context(&self.tracer, parent);
        span.end();
    }
}
