//! Tower Layer wiring the correlator into a Lambda handler stack.

use crate::config::CorrelationConfig;
use crate::correlator::Correlator;
use crate::flush::TelemetryFlush;
use crate::instrument::{AlwaysStart, InvocationGate};
use crate::service::CorrelationService;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::Arc;
use tower::Layer;

/// Tower layer that correlates each Lambda invocation into a trace.
///
/// Wraps a handler service so that every invocation:
/// - extracts upstream trace context from the event's competing carriers
/// - classifies the event shape and opens a trigger span
/// - opens the function span and optional per-record message spans
/// - emits crash-resilient early span clones before the handler runs
/// - closes spans innermost-first and flushes before the response returns
///
/// # Example
///
/// ```ignore
/// use opentelemetry_lambda_correlation::CorrelationLayer;
/// use tower::ServiceBuilder;
///
/// let layer = CorrelationLayer::builder()
///     .tracer_provider(provider)
///     .build();
///
/// let service = ServiceBuilder::new().layer(layer).service(my_handler);
/// ```
#[derive(Clone)]
pub struct CorrelationLayer {
    correlator: Arc<Correlator>,
}

impl CorrelationLayer {
    /// Creates a layer with default configuration, no gate and no flush
    /// capability (spans rely on the SDK pipeline's own export cadence).
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for more detailed configuration.
    pub fn builder() -> CorrelationLayerBuilder {
        CorrelationLayerBuilder::new()
    }

    /// The correlator shared by services built from this layer.
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }
}

impl Default for CorrelationLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService::new(inner, self.correlator.clone())
    }
}

/// Builder for configuring a [`CorrelationLayer`].
#[must_use = "builders do nothing unless .build() is called"]
pub struct CorrelationLayerBuilder {
    config: CorrelationConfig,
    gate: Box<dyn InvocationGate>,
    flusher: Option<Arc<dyn TelemetryFlush>>,
}

impl CorrelationLayerBuilder {
    /// Creates a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: CorrelationConfig::default(),
            gate: Box::new(AlwaysStart),
            flusher: None,
        }
    }

    /// Sets the correlation configuration.
    pub fn config(mut self, config: CorrelationConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the invocation gate consulted once per invocation.
    ///
    /// Closures can be adapted with [`gate_fn`](crate::gate_fn).
    pub fn gate<G>(mut self, gate: G) -> Self
    where
        G: InvocationGate + 'static,
    {
        self.gate = Box::new(gate);
        self
    }

    /// Installs an SDK tracer provider as the flush capability.
    ///
    /// Without one, early and final flushes are skipped and spans rely on
    /// the pipeline's own export cadence.
    pub fn tracer_provider(mut self, provider: Arc<SdkTracerProvider>) -> Self {
        self.flusher = Some(provider as Arc<dyn TelemetryFlush>);
        self
    }

    /// Installs a custom flush capability.
    pub fn flusher(mut self, flusher: Arc<dyn TelemetryFlush>) -> Self {
        self.flusher = Some(flusher);
        self
    }

    /// Builds the configured layer.
    pub fn build(self) -> CorrelationLayer {
        CorrelationLayer {
            correlator: Arc::new(Correlator::new(self.config, self.gate, self.flusher)),
        }
    }
}

impl Default for CorrelationLayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
