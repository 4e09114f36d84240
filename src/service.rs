//! Tower Service running the correlator around a Lambda handler.

use crate::correlator::Correlator;
use crate::future::CorrelationFuture;
use lambda_runtime::LambdaEvent;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Tower service that correlates each invocation into a trace.
///
/// The handler consumes `LambdaEvent<serde_json::Value>` so that one service
/// can face every trigger shape; classification happens per invocation on
/// the raw payload. The handler's output or error is always returned to the
/// runtime unchanged.
#[derive(Clone)]
pub struct CorrelationService<S> {
    inner: S,
    correlator: Arc<Correlator>,
}

impl<S> CorrelationService<S> {
    pub(crate) fn new(inner: S, correlator: Arc<Correlator>) -> Self {
        Self { inner, correlator }
    }
}

impl<S> Service<LambdaEvent<JsonValue>> for CorrelationService<S>
where
    S: Service<LambdaEvent<JsonValue>, Response = JsonValue>,
    S::Error: std::fmt::Display,
{
    type Response = JsonValue;
    type Error = S::Error;
    type Future = CorrelationFuture<S::Future, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, event: LambdaEvent<JsonValue>) -> Self::Future {
        let (payload, lambda_ctx) = event.into_parts();

        // The handler gets its own copy of the event; the correlator owns
        // the request for the rest of the invocation.
        let handler_event = LambdaEvent::new(payload.clone(), lambda_ctx.clone());

        match self.correlator.begin(payload, lambda_ctx) {
            Some(invocation) => {
                // Early clones go out before the handler is ever polled.
                self.correlator.emit_early_spans(&invocation);
                let early_flush = self.correlator.flush_future();
                let inner = self.inner.call(handler_event);
                CorrelationFuture::traced(inner, invocation, self.correlator.clone(), early_flush)
            }
            None => CorrelationFuture::passthrough(self.inner.call(handler_event)),
        }
    }
}
