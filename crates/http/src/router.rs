//! Router builder for rbx HTTP servers

use axum::{middleware, Router};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use rbx_telemetry::instrumentation::{Instrumentations, HTTP_LAYER, HTTP_SERVER};

use crate::request::{record_metrics, RecordStatus, RequestSpan};
use crate::MakeRequestUuid;

/// Builder for constructing the main HTTP router.
///
/// Layers only wrap routes added before them, so add routes first.
pub struct RouterBuilder {
    router: Router,
}

impl RouterBuilder {
    /// Create a new router builder
    pub fn new() -> Self {
        Self {
            router: Router::new(),
        }
    }

    /// Add a route to the router
    pub fn route(mut self, path: &str, route: axum::routing::MethodRouter) -> Self {
        self.router = self.router.route(path, route);
        self
    }

    /// Mount a service's router under `/api/{name}`
    pub fn mount(mut self, name: &str, router: Router) -> Self {
        let api_path = format!("/api/{}", name);
        self.router = self.router.nest(&api_path, router);
        self
    }

    /// Framework-provided request logging, used when telemetry is off.
    pub fn with_tracing(mut self) -> Self {
        self.router = self.router.layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_request(DefaultOnRequest::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        );
        self
    }

    /// Attach the request lifecycle integration registered by telemetry.
    ///
    /// Request metrics are recorded only when a metrics provider exists.
    pub fn with_telemetry(mut self, instrumentations: &Instrumentations) -> Self {
        if !instrumentations.is_enabled(HTTP_SERVER) {
            return self.with_tracing();
        }

        if instrumentations.metrics_enabled() {
            self.router = self.router.layer(middleware::from_fn(record_metrics));
        }

        let make_span = RequestSpan::new(instrumentations.is_enabled(HTTP_LAYER));
        self.router = self.router.layer(
            TraceLayer::new_for_http()
                .make_span_with(make_span)
                .on_request(())
                .on_response(RecordStatus),
        );
        self
    }

    /// Add CORS middleware
    pub fn with_cors(mut self) -> Self {
        self.router = self.router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
        self
    }

    /// Add request ID middleware
    pub fn with_request_id(mut self) -> Self {
        self.router = self
            .router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));
        self
    }

    /// Add timeout middleware
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.router = self
            .router
            .layer(TimeoutLayer::new(Duration::from_millis(timeout_ms)));
        self
    }

    /// Build the final router
    pub fn build(self) -> Router {
        self.router
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode, routing::get};
    use tower::ServiceExt;

    fn request(path: &str) -> Request<Body> {
        Request::get(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_router_builder_basic() {
        let router = RouterBuilder::new()
            .route("/test", get(|| async { "test" }))
            .build();

        let response = router.oneshot(request("/test")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mounting() {
        let orders = Router::new().route("/", get(|| async { "orders" }));

        let router = RouterBuilder::new().mount("orders", orders).build();

        let response = router.oneshot(request("/api/orders")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_chain_with_telemetry() {
        let instrumentations = Instrumentations::new(&[], None);
        let router = RouterBuilder::new()
            .route("/health", get(|| async { "ok" }))
            .with_telemetry(&instrumentations)
            .with_cors()
            .with_request_id()
            .with_timeout(5000)
            .build();

        let response = router.oneshot(request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_fallback_through_tracing_layer() {
        let router = RouterBuilder::new()
            .route("/health", get(|| async { "ok" }))
            .with_tracing()
            .build();

        let response = router.oneshot(request("/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
