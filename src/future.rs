//! Future implementation sequencing early flush, handler and teardown.

use crate::correlator::{Correlator, TracedInvocation};
use pin_project::pin_project;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Future wrapping an instrumented handler invocation.
///
/// This future:
/// 1. Drives the early-span flush to completion before the handler runs
/// 2. Polls the handler under the function span's ambient context
/// 3. Closes the spans innermost-first with the handler's result
/// 4. Runs the bounded final flush before returning
///
/// The flush ordering is what makes the instrumentation crash-resilient:
/// early clones are on the wire before any handler code executes, and the
/// future does not return until the final flush completes or times out, so
/// spans are not lost to Lambda freezing the execution environment.
#[pin_project]
pub struct CorrelationFuture<F, E> {
    #[pin]
    inner: F,
    early_flush: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    finish: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    invocation: Option<TracedInvocation>,
    correlator: Option<Arc<Correlator>>,
    pending_result: Option<Result<JsonValue, E>>,
}

impl<F, E> CorrelationFuture<F, E> {
    pub(crate) fn traced(
        inner: F,
        invocation: TracedInvocation,
        correlator: Arc<Correlator>,
        early_flush: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) -> Self {
        Self {
            inner,
            early_flush: Some(early_flush),
            finish: None,
            invocation: Some(invocation),
            correlator: Some(correlator),
            pending_result: None,
        }
    }

    /// Uninstrumented passthrough for gate-suppressed invocations.
    pub(crate) fn passthrough(inner: F) -> Self {
        Self {
            inner,
            early_flush: None,
            finish: None,
            invocation: None,
            correlator: None,
            pending_result: None,
        }
    }
}

impl<F, E> Future for CorrelationFuture<F, E>
where
    F: Future<Output = Result<JsonValue, E>>,
    E: std::fmt::Display,
{
    type Output = Result<JsonValue, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        // The handler must not run until the early clones are flushed.
        if let Some(flush) = this.early_flush.as_mut() {
            match flush.as_mut().poll(cx) {
                Poll::Ready(()) => *this.early_flush = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.pending_result.is_none() && this.finish.is_none() {
            // Attach the function span's context while polling so that any
            // spans the handler opens have the correct parent. The guard is
            // released on every exit path of this poll.
            let poll_result = if let Some(invocation) = this.invocation.as_ref() {
                let _guard = invocation.handler_context().clone().attach();
                this.inner.as_mut().poll(cx)
            } else {
                this.inner.as_mut().poll(cx)
            };

            match poll_result {
                Poll::Ready(result) => {
                    if let (Some(correlator), Some(invocation)) =
                        (this.correlator.take(), this.invocation.take())
                    {
                        let response = result.as_ref().ok().cloned();
                        let error_message = result.as_ref().err().map(ToString::to_string);
                        *this.finish = Some(Box::pin(async move {
                            correlator
                                .finish(invocation, response.as_ref(), error_message.as_deref())
                                .await;
                        }));
                        *this.pending_result = Some(result);
                    } else {
                        return Poll::Ready(result);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        if let Some(finish) = this.finish.as_mut() {
            match finish.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    *this.finish = None;
                    return Poll::Ready(
                        this.pending_result
                            .take()
                            .expect("pending_result should be set when finishing"),
                    );
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        Poll::Ready(
            this.pending_result
                .take()
                .expect("pending_result should be set"),
        )
    }
}
