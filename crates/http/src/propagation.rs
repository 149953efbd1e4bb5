//! Inbound trace context for the HTTP layer.

use axum::http::HeaderMap;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{global, Context};
use rbx_telemetry::instrumentation::HTTP_LAYER_TARGET;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Context carried by the request headers, per the global propagator.
pub fn remote_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Parent `span` on the caller's trace when the request carries one.
pub fn adopt_remote_parent(span: &Span, headers: &HeaderMap) -> bool {
    let parent = remote_context(headers);
    let remote = parent.span().span_context().clone();
    if !remote.is_valid() {
        return false;
    }

    tracing::trace!(
        target: HTTP_LAYER_TARGET,
        trace_id = %remote.trace_id(),
        sampled = remote.is_sampled(),
        "continuing remote trace"
    );
    span.set_parent(parent);
    true
}
