use std::net::SocketAddr;

use thiserror::Error;

/// Failures inside the telemetry bootstrap.
///
/// None of these abort the host process; `setup` logs them and carries on
/// with reduced observability.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to build span exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("failed to bind scrape listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("scrape listener requires a running tokio runtime")]
    NoRuntime,

    #[error("failed to shut down tracer provider: {0}")]
    Shutdown(#[from] opentelemetry_sdk::error::OTelSdkError),
}
