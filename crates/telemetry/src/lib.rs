//! Telemetry bootstrap for rbx services.
//!
//! [`setup`] reads `ENV_RBX_*` configuration once and, when telemetry is
//! enabled, registers a tracer provider exporting over OTLP, optionally a
//! Prometheus scrape endpoint, and the instrumentation set. Every failure
//! degrades observability instead of aborting the host process.

pub mod error;
pub mod instrumentation;
pub mod logging;
pub mod metrics;
pub mod sampler;
pub mod tracer;

use opentelemetry_sdk::trace::SdkTracerProvider;
use rbx_kernel::TelemetryConfig;

pub use error::TelemetryError;
pub use instrumentation::Instrumentations;
pub use crate::metrics::MetricsEndpoint;
pub use sampler::RbxSampler;

/// Handles to everything `setup` installed.
#[derive(Debug)]
pub struct Telemetry {
    config: TelemetryConfig,
    tracer_provider: Option<SdkTracerProvider>,
    metrics: Option<MetricsEndpoint>,
    instrumentations: Option<&'static Instrumentations>,
    subscriber_installed: bool,
}

impl Telemetry {
    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.tracer_provider.as_ref()
    }

    pub fn metrics(&self) -> Option<&MetricsEndpoint> {
        self.metrics.as_ref()
    }

    pub fn instrumentations(&self) -> Option<&'static Instrumentations> {
        self.instrumentations
    }

    /// Whether this call installed the global `tracing` subscriber.
    pub fn subscriber_installed(&self) -> bool {
        self.subscriber_installed
    }

    /// Flush pending spans and stop the exporter.
    pub fn shutdown(self) -> Result<(), TelemetryError> {
        if let Some(provider) = self.tracer_provider {
            provider.shutdown()?;
            tracing::info!("tracer provider shut down");
        }
        Ok(())
    }
}

/// Bootstrap telemetry from the process environment.
pub fn setup() -> Telemetry {
    let config = logging::bootstrap_scope(TelemetryConfig::from_env);
    setup_with(config)
}

/// Bootstrap telemetry from an already loaded configuration.
///
/// Intended to run once, early in `main`, inside the tokio runtime that will
/// serve the scrape endpoint.
pub fn setup_with(config: TelemetryConfig) -> Telemetry {
    if !config.enabled {
        let subscriber_installed = logging::init(config.log_format, false, None);
        tracing::debug!("telemetry disabled");
        return Telemetry {
            config,
            tracer_provider: None,
            metrics: None,
            instrumentations: None,
            subscriber_installed,
        };
    }

    let provider = tracer::init_tracer_provider(&config);
    let otel = provider.as_ref().ok().map(|provider| {
        (
            provider,
            instrumentation::export_filter(&config.disabled_instrumentations),
        )
    });
    let subscriber_installed = logging::init(config.log_format, config.debug, otel);

    let tracer_provider = match provider {
        Ok(provider) => Some(provider),
        Err(err) => {
            tracing::error!(error = %err, "tracing disabled: span exporter unavailable");
            None
        }
    };

    let metrics = if config.prometheus.enabled {
        match crate::metrics::init_metrics(&config.prometheus) {
            Ok(endpoint) => Some(endpoint),
            Err(err) => {
                tracing::error!(error = %err, "prometheus scrape endpoint unavailable");
                None
            }
        }
    } else {
        None
    };

    let instrumentations = instrumentation::register_instrumentations(
        &config.disabled_instrumentations,
        metrics.clone(),
    );

    tracing::info!(
        service = config.app_name.as_deref().unwrap_or("<unset>"),
        tracing = tracer_provider.is_some(),
        metrics = metrics.is_some(),
        debug = config.debug,
        "telemetry initialized"
    );

    Telemetry {
        config,
        tracer_provider,
        metrics,
        instrumentations: Some(instrumentations),
        subscriber_installed,
    }
}
