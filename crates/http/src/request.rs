//! Request lifecycle integration: one server span per request and request
//! metrics when a metrics provider is registered.

use std::time::{Duration, Instant};

use axum::{
    extract::{MatchedPath, Request},
    http,
    middleware::Next,
    response::Response,
};
use rbx_telemetry::instrumentation::HTTP_SERVER_TARGET;
use tower_http::trace::{MakeSpan, OnResponse};
use tracing::{field::Empty, Span};

use crate::propagation;

pub const REQUESTS_TOTAL: &str = "http_server_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "http_server_request_duration_seconds";

/// Route label shared by every request no route matched.
pub const UNMATCHED_ROUTE: &str = "unmatched";

fn matched_route<B>(request: &http::Request<B>) -> Option<String> {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
}

fn route_label<B>(request: &http::Request<B>) -> String {
    matched_route(request).unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

/// Builds the server span for each request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSpan {
    propagate: bool,
}

impl RequestSpan {
    /// `propagate` continues traces from inbound `traceparent` headers.
    pub fn new(propagate: bool) -> Self {
        Self { propagate }
    }
}

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> Span {
        let route = matched_route(request);
        let name = match &route {
            Some(route) => format!("{} {}", request.method(), route),
            None => request.method().to_string(),
        };
        let span = tracing::info_span!(
            target: HTTP_SERVER_TARGET,
            "HTTP request",
            otel.name = %name,
            otel.kind = "server",
            otel.status_code = Empty,
            http.request.method = %request.method(),
            http.route = Empty,
            url.path = %request.uri().path(),
            http.response.status_code = Empty,
        );
        if let Some(route) = &route {
            span.record("http.route", tracing::field::display(route));
        }

        if self.propagate {
            propagation::adopt_remote_parent(&span, request.headers());
        }

        span
    }
}

/// Records the response status on the request span.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordStatus;

impl<B> OnResponse<B> for RecordStatus {
    fn on_response(self, response: &http::Response<B>, latency: Duration, span: &Span) {
        let status = response.status();
        span.record("http.response.status_code", status.as_u16());
        if status.is_server_error() {
            span.record("otel.status_code", "ERROR");
        }

        tracing::debug!(
            target: HTTP_SERVER_TARGET,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "request completed"
        );
    }
}

/// Middleware counting requests and timing them, labelled by method, route
/// and status.
pub async fn record_metrics(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let route = route_label(&request);

    let response = next.run(request).await;

    let labels = [
        ("method", method),
        ("route", route),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!(REQUESTS_TOTAL, &labels).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, &labels).record(started.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, middleware, routing::get, Router};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;
    use tower_http::trace::TraceLayer;
    use tracing_test::traced_test;

    use super::*;

    fn orders_router() -> Router {
        Router::new()
            .route("/orders/{id}", get(|| async { "order" }))
            .route("/boom", get(|| async { http::StatusCode::INTERNAL_SERVER_ERROR }))
    }

    fn get_request(path: &str) -> http::Request<Body> {
        http::Request::get(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn request_span_records_route_and_status() {
        let router = orders_router().layer(
            TraceLayer::new_for_http()
                .make_span_with(RequestSpan::new(false))
                .on_request(())
                .on_response(RecordStatus),
        );

        let response = router.oneshot(get_request("/orders/42")).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        assert!(logs_contain("request completed"));
        assert!(logs_contain("http.route=/orders/{id}"));
        assert!(logs_contain("url.path=/orders/42"));
        assert!(logs_contain("status=200"));
    }

    #[test]
    fn metrics_are_labelled_by_route_and_status() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let router = orders_router().layer(middleware::from_fn(record_metrics));
                router.clone().oneshot(get_request("/orders/1")).await.unwrap();
                router.clone().oneshot(get_request("/orders/2")).await.unwrap();
                router.oneshot(get_request("/boom")).await.unwrap();
            })
        });

        let rendered = handle.render();
        assert!(
            rendered.contains(
                r#"http_server_requests_total{method="GET",route="/orders/{id}",status="200"} 2"#
            ),
            "{rendered}"
        );
        assert!(
            rendered.contains(r#"http_server_requests_total{method="GET",route="/boom",status="500"} 1"#),
            "{rendered}"
        );
        assert!(rendered.contains("http_server_request_duration_seconds"));
    }

    #[test]
    fn unmatched_requests_share_one_route_label() {
        let request = http::Request::get("/orders/42").body(()).unwrap();
        assert_eq!(route_label(&request), UNMATCHED_ROUTE);
    }

    #[test]
    fn scanned_paths_do_not_grow_label_sets() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let router = Router::new()
                    .route("/x", get(|| async { "x" }))
                    .layer(middleware::from_fn(record_metrics));
                for i in 0..200 {
                    let response = router
                        .clone()
                        .oneshot(get_request(&format!("/scan/{i}")))
                        .await
                        .unwrap();
                    assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
                }
            })
        });

        let rendered = handle.render();
        let series = rendered
            .lines()
            .filter(|line| line.starts_with("http_server_requests_total{"))
            .count();
        assert_eq!(series, 1, "{rendered}");
        assert!(
            rendered.contains(
                r#"http_server_requests_total{method="GET",route="unmatched",status="404"} 200"#
            ),
            "{rendered}"
        );
        assert!(!rendered.contains("/scan/"));
    }

    #[tokio::test]
    async fn matched_route_is_used_for_labels() {
        async fn echo_route(request: Request) -> String {
            route_label(&request)
        }

        let router = Router::new().route("/orders/{id}", get(echo_route));
        let response = router
            .oneshot(http::Request::get("/orders/42").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"/orders/{id}");
    }
}
