//! Instrumentation registration.
//!
//! Libraries emit their spans under `tracing` targets. Registering an
//! instrumentation means letting its targets through to the OpenTelemetry
//! layer; disabling one shuts those targets off for export while plain
//! logging keeps seeing them.

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::{LevelFilter, Targets};

use crate::metrics::MetricsEndpoint;

/// A named instrumentation and the `tracing` targets it emits under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentationSpec {
    pub name: &'static str,
    pub targets: &'static [&'static str],
}

pub const HTTP_SERVER: &str = "http-server";
pub const HTTP_LAYER: &str = "http-layer";

/// Target of the request lifecycle spans emitted by the HTTP server integration.
pub const HTTP_SERVER_TARGET: &str = "rbx_http::request";
/// Target used when inbound trace context is adopted.
pub const HTTP_LAYER_TARGET: &str = "rbx_http::propagation";

/// Instrumentations detected from the crates a server process typically links.
pub const AUTO_INSTRUMENTATIONS: &[InstrumentationSpec] = &[
    InstrumentationSpec {
        name: "fs",
        targets: &["tokio::fs", "async_fs"],
    },
    InstrumentationSpec {
        name: "net",
        targets: &["tokio::net", "mio", "socket2"],
    },
    InstrumentationSpec {
        name: "dns",
        targets: &["hickory_resolver", "hickory_proto", "trust_dns_resolver"],
    },
    InstrumentationSpec {
        name: "http",
        targets: &["hyper", "hyper_util", "h2", "reqwest"],
    },
    InstrumentationSpec {
        name: "framework-http",
        targets: &["tower_http::trace", "axum::serve"],
    },
    InstrumentationSpec {
        name: "dataloader",
        targets: &["async_graphql::dataloader", "dataloader"],
    },
    InstrumentationSpec {
        name: "runtime",
        targets: &["tokio::task", "runtime"],
    },
    InstrumentationSpec {
        name: "sql",
        targets: &["sqlx::query"],
    },
];

/// Integrations registered alongside the detected set; they cannot be disabled.
pub const DEDICATED_INTEGRATIONS: &[InstrumentationSpec] = &[
    InstrumentationSpec {
        name: HTTP_SERVER,
        targets: &[HTTP_SERVER_TARGET],
    },
    InstrumentationSpec {
        name: HTTP_LAYER,
        targets: &[HTTP_LAYER_TARGET],
    },
];

// The exporter's own diagnostics must never be exported as spans.
const TOOLKIT_TARGETS: &[&str] = &[
    "opentelemetry",
    "opentelemetry_sdk",
    "opentelemetry_otlp",
    "opentelemetry_http",
    "tracing_opentelemetry",
];

static REGISTERED: OnceCell<Instrumentations> = OnceCell::new();

/// Result of instrumentation registration.
#[derive(Debug, Clone)]
pub struct Instrumentations {
    enabled: Vec<&'static str>,
    disabled: Vec<&'static str>,
    metrics: Option<MetricsEndpoint>,
}

impl Instrumentations {
    /// Resolve the detected set against `disabled`, keeping the dedicated
    /// integrations on regardless.
    pub fn new(disabled: &[String], metrics: Option<MetricsEndpoint>) -> Self {
        for name in disabled {
            if DEDICATED_INTEGRATIONS.iter().any(|spec| spec.name == name) {
                tracing::warn!(instrumentation = %name, "dedicated integration cannot be disabled");
            } else if !AUTO_INSTRUMENTATIONS.iter().any(|spec| spec.name == name) {
                tracing::warn!(instrumentation = %name, "unknown instrumentation ignored");
            }
        }

        let is_disabled = |spec: &InstrumentationSpec| disabled.iter().any(|d| d == spec.name);

        let mut enabled = Vec::new();
        let mut off = Vec::new();
        for spec in AUTO_INSTRUMENTATIONS {
            if is_disabled(spec) {
                off.push(spec.name);
            } else {
                enabled.push(spec.name);
            }
        }
        enabled.extend(DEDICATED_INTEGRATIONS.iter().map(|spec| spec.name));

        Self {
            enabled,
            disabled: off,
            metrics,
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.iter().any(|enabled| *enabled == name)
    }

    pub fn enabled(&self) -> &[&'static str] {
        &self.enabled
    }

    pub fn disabled(&self) -> &[&'static str] {
        &self.disabled
    }

    /// Metrics handle instrumentations emit through, when Prometheus is on.
    pub fn metrics(&self) -> Option<&MetricsEndpoint> {
        self.metrics.as_ref()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Register instrumentations for the life of the process.
///
/// Only the first call takes effect; later calls return that registration.
pub fn register_instrumentations(
    disabled: &[String],
    metrics: Option<MetricsEndpoint>,
) -> &'static Instrumentations {
    let mut fresh = false;
    let registered = REGISTERED.get_or_init(|| {
        fresh = true;
        Instrumentations::new(disabled, metrics)
    });

    if fresh {
        tracing::info!(
            enabled = ?registered.enabled(),
            disabled = ?registered.disabled(),
            metrics = registered.metrics_enabled(),
            "instrumentations registered"
        );
    } else {
        tracing::debug!("instrumentations already registered; keeping first registration");
    }

    registered
}

/// The process-wide registration, if one happened.
pub fn registered() -> Option<&'static Instrumentations> {
    REGISTERED.get()
}

/// Target filter for the OpenTelemetry layer.
pub fn export_filter(disabled: &[String]) -> Targets {
    let mut targets = Targets::new().with_default(LevelFilter::TRACE);

    for spec in AUTO_INSTRUMENTATIONS {
        if disabled.iter().any(|d| d == spec.name) {
            for target in spec.targets {
                targets = targets.with_target(*target, LevelFilter::OFF);
            }
        }
    }
    for spec in DEDICATED_INTEGRATIONS {
        for target in spec.targets {
            targets = targets.with_target(*target, LevelFilter::TRACE);
        }
    }
    for target in TOOLKIT_TARGETS {
        targets = targets.with_target(*target, LevelFilter::OFF);
    }

    targets
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_disabled_set_is_excluded() {
        let disabled = names(&["fs", "net", "dns", "framework-http", "dataloader"]);
        let registration = Instrumentations::new(&disabled, None);

        for name in ["fs", "net", "dns", "framework-http", "dataloader"] {
            assert!(!registration.is_enabled(name), "{name} should be off");
        }
        for name in ["http", "runtime", "sql", HTTP_SERVER, HTTP_LAYER] {
            assert!(registration.is_enabled(name), "{name} should be on");
        }
        assert!(!registration.metrics_enabled());
    }

    #[test]
    fn dedicated_integrations_cannot_be_disabled() {
        let registration = Instrumentations::new(&names(&[HTTP_SERVER, HTTP_LAYER, "bogus"]), None);
        assert!(registration.is_enabled(HTTP_SERVER));
        assert!(registration.is_enabled(HTTP_LAYER));
        assert!(registration.disabled().is_empty());
    }

    #[test]
    fn export_filter_turns_off_disabled_targets() {
        let filter = export_filter(&names(&["dns", "framework-http"]));

        assert!(!filter.would_enable("hickory_resolver::lookup", &Level::INFO));
        assert!(!filter.would_enable("tower_http::trace::on_response", &Level::DEBUG));
        assert!(filter.would_enable("hyper_util::client", &Level::DEBUG));
        assert!(filter.would_enable(HTTP_SERVER_TARGET, &Level::INFO));
        assert!(filter.would_enable("rbx_app::routes", &Level::TRACE));
    }

    #[test]
    fn export_filter_always_silences_toolkit() {
        let filter = export_filter(&[]);
        assert!(!filter.would_enable("opentelemetry_sdk::trace", &Level::ERROR));
        assert!(!filter.would_enable("opentelemetry_otlp", &Level::WARN));
    }

    #[test]
    fn registration_happens_once() {
        let first = register_instrumentations(&names(&["fs"]), None);
        let second = register_instrumentations(&[], None);
        assert!(std::ptr::eq(first, second));
        assert!(std::ptr::eq(registered().unwrap(), first));
    }
}
