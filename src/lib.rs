//! rbx application library: the service routes served by `rbx-app`.

pub mod greetings;

use axum::Router;

/// Service routers mounted under `/api/{name}`.
pub fn services() -> Vec<(&'static str, Router)> {
    vec![(greetings::NAME, greetings::routes())]
}
