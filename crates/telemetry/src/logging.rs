//! Structured logging and the `tracing` → OpenTelemetry bridge.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use rbx_kernel::LogFormat;
use tracing_subscriber::{
    filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::tracer::TRACER_NAME;

// Elevated verbosity for the toolkit's internal diagnostics.
const TOOLKIT_DEBUG_DIRECTIVES: &[&str] = &[
    "opentelemetry=trace",
    "opentelemetry_sdk=trace",
    "opentelemetry_otlp=trace",
];

/// Run `f` with a temporary stderr logger.
///
/// Configuration is read before the global subscriber exists; this keeps its
/// diagnostics visible.
pub fn bootstrap_scope<T>(f: impl FnOnce() -> T) -> T {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(false))
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Filter for log output. `RUST_LOG` wins, `info` otherwise.
pub fn env_filter(debug: bool) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if debug {
        for directive in TOOLKIT_DEBUG_DIRECTIVES {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Install the global subscriber.
///
/// When `otel` is given, spans passing its target filter are exported through
/// the provider. Returns `false` if another subscriber was already installed.
pub fn init(format: LogFormat, debug: bool, otel: Option<(&SdkTracerProvider, Targets)>) -> bool {
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter(debug))
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(env_filter(debug))
            .boxed(),
    };

    let otel_layer = otel.map(|(provider, targets)| {
        tracing_opentelemetry::layer()
            .with_tracer(provider.tracer(TRACER_NAME))
            .with_filter(targets)
    });

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .is_ok()
}
