//! Trace context extraction from competing invocation carriers.
//!
//! A Lambda payload can carry upstream trace context in two places: the
//! event's `headers` object (HTTP-shaped triggers) and the client context's
//! `custom` map (direct SDK invocations). Extraction probes them in that
//! strict order through the globally configured propagator and returns the
//! first successfully decoded context. Sources are never merged.

use crate::request::InvocationRequest;
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, global};
use std::collections::HashMap;

/// Read-only carrier over a string map with case-insensitive lookup.
///
/// Propagators probe lower-case keys; payload carriers may use any casing.
pub struct Carrier<'a> {
    entries: &'a HashMap<String, String>,
}

impl<'a> Carrier<'a> {
    /// Wraps a string map as an extraction carrier.
    pub fn new(entries: &'a HashMap<String, String>) -> Self {
        Self { entries }
    }
}

impl Extractor for Carrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str).or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

/// Mutable carrier used for injection.
///
/// Keys are written with the exact casing the propagator chooses.
pub struct CarrierMut<'a> {
    entries: &'a mut HashMap<String, String>,
}

impl<'a> CarrierMut<'a> {
    /// Wraps a string map as an injection carrier.
    pub fn new(entries: &'a mut HashMap<String, String>) -> Self {
        Self { entries }
    }
}

impl Injector for CarrierMut<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }
}

/// Carrier over a JSON object whose string-valued fields are propagation
/// entries, e.g. a `_context` object embedded in a message body.
pub(crate) struct JsonCarrier<'a> {
    object: &'a serde_json::Map<String, serde_json::Value>,
}

impl<'a> JsonCarrier<'a> {
    pub(crate) fn new(object: &'a serde_json::Map<String, serde_json::Value>) -> Self {
        Self { object }
    }
}

impl Extractor for JsonCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.object.keys().map(String::as_str).collect()
    }
}

/// Determines the upstream parent context for an invocation.
///
/// Probes, in order: the normalized event headers, then the client context's
/// `custom` map. The first source that decodes to a valid span context wins
/// outright; if the headers fail and a client context is present, its
/// extraction result is returned as-is. With neither source usable the root
/// context is returned. Never panics.
pub fn extract_parent_context(request: &InvocationRequest) -> Context {
    let root = Context::new();

    let from_headers = global::get_text_map_propagator(|propagator| {
        propagator.extract_with_context(&root, &Carrier::new(request.headers()))
    });
    if from_headers.span().span_context().is_valid() {
        return from_headers;
    }

    if let Some(custom) = request.client_custom() {
        return global::get_text_map_propagator(|propagator| {
            propagator.extract_with_context(&root, &Carrier::new(custom))
        });
    }

    root
}

/// Injects the given context into a string map through the global propagator.
pub fn inject_context(cx: &Context, entries: &mut HashMap<String, String>) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut CarrierMut::new(entries));
    });
}
