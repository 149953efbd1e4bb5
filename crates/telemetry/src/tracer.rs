//! Tracer provider: sampler, resource and batched OTLP export.

use std::collections::HashMap;

use opentelemetry::global;
use opentelemetry_otlp::{SpanExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use rbx_kernel::TelemetryConfig;

use crate::error::TelemetryError;
use crate::sampler::RbxSampler;

/// Instrumentation scope reported on every span bridged from `tracing`.
pub const TRACER_NAME: &str = "rbx-telemetry";

/// Build the tracer provider and register it process-wide.
///
/// Also installs the W3C trace-context propagator so inbound integrations can
/// continue remote traces.
pub fn init_tracer_provider(config: &TelemetryConfig) -> Result<SdkTracerProvider, TelemetryError> {
    let exporter = build_exporter(config)?;

    let provider = SdkTracerProvider::builder()
        .with_sampler(RbxSampler::default())
        .with_resource(service_resource(config.app_name.as_deref()))
        .with_batch_exporter(exporter)
        .build();

    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(provider.clone());

    tracing::debug!(
        collector = config.jaeger.as_deref().unwrap_or("<default>"),
        service = config.app_name.as_deref().unwrap_or("<unset>"),
        authenticated = config.jaeger_token.is_some(),
        "tracer provider registered"
    );

    Ok(provider)
}

/// OTLP/HTTP span exporter pointed at the configured collector.
pub fn build_exporter(config: &TelemetryConfig) -> Result<SpanExporter, TelemetryError> {
    let mut builder = SpanExporter::builder()
        .with_http()
        .with_headers(collector_headers(config.jaeger_token.as_deref()));

    if let Some(endpoint) = &config.jaeger {
        builder = builder.with_endpoint(endpoint.clone());
    }

    Ok(builder.build()?)
}

pub fn service_resource(app_name: Option<&str>) -> Resource {
    match app_name {
        Some(name) => Resource::builder().with_service_name(name.to_string()).build(),
        None => Resource::builder().build(),
    }
}

pub fn collector_headers(token: Option<&str>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
        headers.insert("Authorization".to_string(), authorization_header(token));
    }
    headers
}

/// Header value for the collector credential.
///
/// A token already in `<scheme> <credential>` form is sent verbatim; a bare
/// credential is sent as a bearer token.
pub fn authorization_header(token: &str) -> String {
    if token.split_whitespace().nth(1).is_some() {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}
