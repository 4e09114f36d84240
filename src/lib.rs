//! Correlated OpenTelemetry traces for AWS Lambda invocations.
//!
//! This crate provides a Tower middleware layer that builds a correlated
//! distributed trace around each Lambda invocation, across heterogeneous,
//! loosely-typed event sources. Every instrumented invocation produces:
//!
//! - a **trigger span** describing the event source (API Gateway REST/HTTP,
//!   SQS, S3, Kinesis), classified by an ordered first-match registry over
//!   the raw payload shape
//! - a **function span** describing the Lambda execution itself, a child of
//!   the trigger span (or of the upstream context when no trigger matched)
//! - optional per-record **message spans** for batch triggers
//!
//! Upstream context is extracted once per invocation from competing
//! carriers: the event's `headers` object first, then the client context's
//! `custom` map; the first source that decodes wins and sources are never
//! merged.
//!
//! # Crash resilience
//!
//! Lambda can freeze or kill the process before spans are exported.
//! Immediately after the function span opens, the layer emits terminal
//! *early clones* of the open spans (same name, kind, attributes and parent
//! chain, tagged with the real spans' ids) and flushes them under a bounded
//! timeout, so a start-state record of the invocation survives a crash. The
//! final flush at end of invocation is bounded the same way and the response
//! is not returned until it completes or times out.
//!
//! Instrumentation is fail-safe throughout: extractor faults are logged and
//! contained, flush problems are swallowed, and the handler's output or
//! error always reaches the runtime unchanged.
//!
//! # Usage
//!
//! ```no_run
//! use lambda_runtime::{run, service_fn, Error, LambdaEvent};
//! use opentelemetry_lambda_correlation::CorrelationLayer;
//! use serde_json::Value;
//! use std::sync::Arc;
//! use tower::ServiceBuilder;
//!
//! async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
//!     Ok(serde_json::json!({"statusCode": 200}))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     // Initialise the SDK pipeline and the W3C propagator first.
//!     let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder().build();
//!
//!     let layer = CorrelationLayer::builder()
//!         .tracer_provider(Arc::new(provider))
//!         .build();
//!
//!     let service = ServiceBuilder::new()
//!         .layer(layer)
//!         .service(service_fn(handler));
//!
//!     run(service).await
//! }
//! ```

mod cold_start;
mod correlator;
mod early;
mod error;
mod flush;
mod future;
mod instrument;
mod layer;
mod propagation;
mod request;
mod service;

pub mod attrs;
pub mod config;
pub mod trigger;

pub use cold_start::check_cold_start;
pub use config::{CorrelationConfig, TriggerKind};
pub use correlator::{Correlator, TracedInvocation};
pub use error::TriggerError;
pub use flush::TelemetryFlush;
pub use future::CorrelationFuture;
pub use instrument::{AlwaysStart, GateFn, InvocationGate, gate_fn};
pub use layer::{CorrelationLayer, CorrelationLayerBuilder};
pub use propagation::{Carrier, CarrierMut, extract_parent_context, inject_context};
pub use request::InvocationRequest;
pub use service::CorrelationService;
pub use trigger::{MessageSpanSpec, Trigger, TriggerRegistry, limited_payload};

/// Instrumentation scope name for every span this crate opens.
pub(crate) const SCOPE_NAME: &str = "opentelemetry-lambda-correlation";
