//! Per-invocation correlation state machine.

use crate::config::CorrelationConfig;
use crate::early::EarlySpanEmitter;
use crate::flush::{TelemetryFlush, flush_bounded};
use crate::instrument::{
    FunctionInstrumenter, InvocationGate, MessageInstrumenter, StartedSpan, TriggerInstrumenter,
};
use crate::propagation::extract_parent_context;
use crate::request::InvocationRequest;
use crate::trigger::TriggerRegistry;
use lambda_runtime::Context as LambdaContext;
use opentelemetry::Context;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Drives one invocation through extraction, classification, span creation,
/// early emission and teardown.
///
/// Shared immutably across concurrent invocations; all per-invocation state
/// lives in the [`TracedInvocation`] it hands out.
pub struct Correlator {
    config: CorrelationConfig,
    registry: TriggerRegistry,
    gate: Box<dyn InvocationGate>,
    function: FunctionInstrumenter,
    trigger: TriggerInstrumenter,
    messages: MessageInstrumenter,
    early: EarlySpanEmitter,
    flusher: Option<Arc<dyn TelemetryFlush>>,
}

/// Open spans and request state for one instrumented invocation.
pub struct TracedInvocation {
    request: InvocationRequest,
    upstream: Context,
    trigger_index: Option<usize>,
    trigger_span: Option<StartedSpan>,
    function_span: StartedSpan,
    message_spans: Vec<StartedSpan>,
}

impl TracedInvocation {
    /// The normalized request this invocation was built from.
    pub fn request(&self) -> &InvocationRequest {
        &self.request
    }

    /// The context the handler runs under: the function span's context.
    pub fn handler_context(&self) -> &Context {
        &self.function_span.cx
    }
}

impl Correlator {
    /// Builds a correlator from configuration, a gate and an optional flush
    /// capability.
    pub fn new(
        config: CorrelationConfig,
        gate: Box<dyn InvocationGate>,
        flusher: Option<Arc<dyn TelemetryFlush>>,
    ) -> Self {
        let registry = TriggerRegistry::new(&config.triggers, config.payload_size_limit);
        Self {
            config,
            registry,
            gate,
            function: FunctionInstrumenter::new(),
            trigger: TriggerInstrumenter::new(),
            messages: MessageInstrumenter::new(),
            early: EarlySpanEmitter::new(),
            flusher,
        }
    }

    /// The trigger registry backing this correlator.
    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    /// Begins an invocation: builds the request, extracts the upstream
    /// context exactly once, consults the gate, and opens the trigger,
    /// function and message spans.
    ///
    /// Returns `None` when the gate suppresses the invocation; a suppressed
    /// invocation opens no spans and triggers no flushes.
    pub fn begin(&self, payload: JsonValue, lambda_ctx: LambdaContext) -> Option<TracedInvocation> {
        let request = InvocationRequest::new(payload, lambda_ctx);
        let upstream = extract_parent_context(&request);

        if !self.gate.should_start(&upstream, &request) {
            return None;
        }

        let matched = self.registry.match_for_request(&request);
        let (trigger_index, trigger_span) = match matched {
            Some((index, trigger)) => (
                Some(index),
                Some(self.trigger.start(&upstream, trigger, &request)),
            ),
            None => (None, None),
        };

        let function_parent = trigger_span
            .as_ref()
            .map(|span| &span.cx)
            .unwrap_or(&upstream);
        let function_span = self.function.start(function_parent, &request);

        let message_spans = match (self.config.message_spans, matched) {
            (true, Some((_, trigger))) => self
                .messages
                .start_all(&function_span.cx, trigger.message_spans(&request)),
            _ => Vec::new(),
        };

        Some(TracedInvocation {
            request,
            upstream,
            trigger_index,
            trigger_span,
            function_span,
            message_spans,
        })
    }

    /// Emits early clones of the open spans. Synchronous; pair with
    /// [`flush_future`] to push them out of the process.
    ///
    /// [`flush_future`]: Correlator::flush_future
    pub(crate) fn emit_early_spans(&self, invocation: &TracedInvocation) {
        self.early.emit(
            &invocation.upstream,
            invocation.trigger_span.as_ref(),
            &invocation.function_span,
        );
    }

    /// A bounded flush of the installed flush capability.
    pub(crate) fn flush_future(&self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(flush_bounded(self.flusher.clone(), self.config.flush_timeout))
    }

    /// Emits early clones of the open spans and flushes them, bounded by the
    /// configured timeout.
    pub async fn emit_early(&self, invocation: &TracedInvocation) {
        self.emit_early_spans(invocation);
        self.flush_future().await;
    }

    /// Finishes an invocation: closes spans innermost-first (message, then
    /// function, then trigger), all observing the same response/error pair,
    /// then runs the bounded final flush.
    pub async fn finish(
        &self,
        invocation: TracedInvocation,
        response: Option<&JsonValue>,
        error: Option<&str>,
    ) {
        let TracedInvocation {
            request,
            upstream: _,
            trigger_index,
            trigger_span,
            function_span,
            message_spans,
        } = invocation;

        self.messages.end_all(message_spans, error);
        self.function.end(function_span, error);

        if let (Some(index), Some(span)) = (trigger_index, trigger_span)
            && let Some(trigger) = self.registry.trigger_at(index)
        {
            self.trigger.end(span, trigger, &request, response, error);
        }

        self.flush_future().await;
    }
}
