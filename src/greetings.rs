//! Greeting service used to exercise request telemetry end to end.

use axum::{extract::Path, http::StatusCode, routing::get, Router};

pub const NAME: &str = "greetings";

const MAX_NAME_LEN: usize = 64;

pub fn routes() -> Router {
    Router::new().route("/{name}", get(greet))
}

#[tracing::instrument(skip_all)]
async fn greet(Path(name): Path<String>) -> Result<String, (StatusCode, String)> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        tracing::warn!("rejected greeting request");
        return Err((
            StatusCode::BAD_REQUEST,
            format!("name must be 1-{MAX_NAME_LEN} characters"),
        ));
    }

    metrics::counter!("rbx_greetings_total").increment(1);
    Ok(format!("hello, {name}"))
}
