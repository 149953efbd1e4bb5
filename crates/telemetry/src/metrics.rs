//! Prometheus metrics provider and scrape listener.

use std::fmt;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use rbx_kernel::PrometheusConfig;
use tokio::runtime::Handle;

use crate::error::TelemetryError;

/// Port bound when the configuration leaves it at `0`.
pub const DEFAULT_SCRAPE_PORT: u16 = 9464;

const SCRAPE_HOST: [u8; 4] = [0, 0, 0, 0];
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Handle to the running scrape endpoint and the recorder behind it.
#[derive(Clone)]
pub struct MetricsEndpoint {
    handle: PrometheusHandle,
    local_addr: SocketAddr,
    path: String,
}

impl MetricsEndpoint {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}{}", self.local_addr.port(), self.path)
    }

    /// Current exposition text, as served to scrapers.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl fmt::Debug for MetricsEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsEndpoint")
            .field("local_addr", &self.local_addr)
            .field("path", &self.path)
            .finish()
    }
}

/// Install the Prometheus recorder and start serving the scrape endpoint.
///
/// Must run inside a tokio runtime; the listener and recorder upkeep are
/// spawned onto it.
pub fn init_metrics(config: &PrometheusConfig) -> Result<MetricsEndpoint, TelemetryError> {
    let runtime = Handle::try_current().map_err(|_| TelemetryError::NoRuntime)?;

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    if let Err(err) = metrics::set_global_recorder(recorder) {
        tracing::warn!(
            error = %err,
            "global metrics recorder already installed; scrape endpoint will not see new metrics"
        );
    }

    serve_scrape_endpoint(&runtime, handle, scrape_addr(config), &scrape_path(&config.endpoint))
}

pub fn scrape_addr(config: &PrometheusConfig) -> SocketAddr {
    let port = match config.port {
        0 => DEFAULT_SCRAPE_PORT,
        port => port,
    };
    SocketAddr::from((SCRAPE_HOST, port))
}

/// Route paths must be absolute.
pub fn scrape_path(endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{endpoint}")
    }
}

pub fn scrape_router(handle: PrometheusHandle, path: &str) -> Router {
    Router::new()
        .route(path, get(render_metrics))
        .with_state(handle)
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], handle.render())
}

pub(crate) fn serve_scrape_endpoint(
    runtime: &Handle,
    handle: PrometheusHandle,
    addr: SocketAddr,
    path: &str,
) -> Result<MetricsEndpoint, TelemetryError> {
    let bind_error = |source: std::io::Error| TelemetryError::Bind { addr, source };

    // Bind synchronously so address conflicts surface during setup.
    let listener = TcpListener::bind(addr).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;
    let listener = {
        let _guard = runtime.enter();
        tokio::net::TcpListener::from_std(listener).map_err(bind_error)?
    };

    let router = scrape_router(handle.clone(), path);
    runtime.spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!(error = %err, "prometheus scrape listener stopped");
        }
    });

    let upkeep = handle.clone();
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
        loop {
            ticker.tick().await;
            upkeep.run_upkeep();
        }
    });

    let endpoint = MetricsEndpoint {
        handle,
        local_addr,
        path: path.to_string(),
    };
    tracing::info!("Prometheus scrape endpoint: {}", endpoint.url());

    Ok(endpoint)
}
