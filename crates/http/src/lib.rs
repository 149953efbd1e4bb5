//! HTTP server facade for rbx services with Axum and request telemetry.

use std::future::Future;

use anyhow::Context;
use axum::{extract::Request, http::HeaderValue, routing::get, Router};
use rbx_kernel::ServerSettings;
use rbx_telemetry::Instrumentations;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::{Timestamp, Uuid};

pub mod propagation;
pub mod request;
pub mod router;

use router::RouterBuilder;

/// Serve `app` until `shutdown` resolves.
pub async fn start_server<F>(settings: &ServerSettings, app: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Build the main router: service routes under `/api/{name}`, `/healthz`,
/// and the request telemetry selected at registration.
pub fn build_router(
    settings: &ServerSettings,
    services: Vec<(&str, Router)>,
    instrumentations: Option<&Instrumentations>,
) -> Router {
    let mut router_builder = RouterBuilder::new().route("/healthz", get(health_check));

    for (name, service_router) in services {
        tracing::info!(service = name, "mounting routes under /api/{}", name);
        router_builder = router_builder.mount(name, service_router);
    }

    router_builder = match instrumentations {
        Some(instrumentations) => router_builder.with_telemetry(instrumentations),
        None => router_builder.with_tracing(),
    };

    router_builder
        .with_cors()
        .with_request_id()
        .with_timeout(settings.request_timeout_ms)
        .build()
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Request ID generator for tracing
#[derive(Clone)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let timestamp = Timestamp::now(uuid::NoContext);
        let request_id = Uuid::new_v7(timestamp)
            .to_string()
            .parse::<HeaderValue>()
            .ok()?;
        Some(RequestId::new(request_id))
    }
}
