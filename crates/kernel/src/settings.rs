use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

pub const ENV_TELEMETRY_ENABLED: &str = "ENV_RBX_TELEMETRY_ENABLED";
pub const ENV_TELEMETRY_DEBUG_ENABLED: &str = "ENV_RBX_TELEMETRY_DEBUG_ENABLED";
pub const ENV_APP_NAME: &str = "ENV_RBX_APP_NAME";
pub const ENV_JAEGER_URL: &str = "ENV_RBX_JAEGER_URL";
pub const ENV_JAEGER_TOKEN: &str = "ENV_RBX_JAEGER_TOKEN";
pub const ENV_PROMETHEUS_ENABLED: &str = "ENV_RBX_PROMETHEUS_ENABLED";
pub const ENV_PROMETHEUS_ENDPOINT: &str = "ENV_RBX_PROMETHEUS_SCRAPPER_ENDPOINT";
pub const ENV_PROMETHEUS_PORT: &str = "ENV_RBX_PROMETHEUS_SCRAPPER_PORT";
pub const ENV_LOG_FORMAT: &str = "ENV_RBX_LOG_FORMAT";
pub const ENV_DISABLED_INSTRUMENTATIONS: &str = "ENV_RBX_TELEMETRY_DISABLED_INSTRUMENTATIONS";
pub const ENV_HTTP_HOST: &str = "ENV_RBX_HTTP_HOST";
pub const ENV_HTTP_PORT: &str = "ENV_RBX_HTTP_PORT";
pub const ENV_HTTP_REQUEST_TIMEOUT_MS: &str = "ENV_RBX_HTTP_REQUEST_TIMEOUT_MS";

/// Package metadata file consulted when no application name is configured.
pub const APP_METADATA_FILE: &str = "package.json";

/// Scrape path used when none is configured.
pub const DEFAULT_PROMETHEUS_ENDPOINT: &str = "/metrics";

/// Instrumentations switched off unless overridden.
pub const DEFAULT_DISABLED_INSTRUMENTATIONS: &[&str] =
    &["fs", "net", "dns", "framework-http", "dataloader"];

/// Top-level configuration for the server process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub telemetry: TelemetryConfig,
}

impl Settings {
    /// Load configuration from `.env` and the process environment.
    pub fn load() -> Result<Self, SettingsError> {
        // Allow missing `.env` files without failing.
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            server: ServerSettings::from_lookup(&lookup)?,
            telemetry: TelemetryConfig::from_lookup(&lookup),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout_ms: u64,
}

impl ServerSettings {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_request_timeout_ms() -> u64 {
        15000
    }

    fn from_lookup<F>(lookup: &F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = non_empty(lookup(ENV_HTTP_HOST)).unwrap_or_else(Self::default_host);
        let port = match non_empty(lookup(ENV_HTTP_PORT)) {
            Some(raw) => parse_strict(ENV_HTTP_PORT, &raw)?,
            None => Self::default_port(),
        };
        let request_timeout_ms = match non_empty(lookup(ENV_HTTP_REQUEST_TIMEOUT_MS)) {
            Some(raw) => parse_strict(ENV_HTTP_REQUEST_TIMEOUT_MS, &raw)?,
            None => Self::default_request_timeout_ms(),
        };

        Ok(Self {
            host,
            port,
            request_timeout_ms,
        })
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Telemetry switches, collector coordinates and scrape settings.
///
/// Read once at startup and never mutated afterwards.
#[derive(Clone, Serialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub debug: bool,
    pub app_name: Option<String>,
    /// Trace collector URL.
    pub jaeger: Option<String>,
    /// Bearer credential sent to the trace collector.
    #[serde(skip_serializing)]
    pub jaeger_token: Option<String>,
    pub prometheus: PrometheusConfig,
    pub log_format: LogFormat,
    pub disabled_instrumentations: Vec<String>,
}

impl TelemetryConfig {
    /// Read the telemetry configuration from the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_name =
            non_empty(lookup(ENV_APP_NAME)).or_else(|| application_name(Path::new(APP_METADATA_FILE)));

        let disabled_instrumentations = match lookup(ENV_DISABLED_INSTRUMENTATIONS) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_DISABLED_INSTRUMENTATIONS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        };

        Self {
            enabled: flag(lookup(ENV_TELEMETRY_ENABLED)),
            debug: flag(lookup(ENV_TELEMETRY_DEBUG_ENABLED)),
            app_name,
            jaeger: non_empty(lookup(ENV_JAEGER_URL)),
            jaeger_token: non_empty(lookup(ENV_JAEGER_TOKEN)),
            prometheus: PrometheusConfig::from_lookup(lookup),
            log_format: lookup(ENV_LOG_FORMAT)
                .map(|raw| LogFormat::parse(&raw))
                .unwrap_or_default(),
            disabled_instrumentations,
        }
    }
}

impl fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("enabled", &self.enabled)
            .field("debug", &self.debug)
            .field("app_name", &self.app_name)
            .field("jaeger", &self.jaeger)
            .field("jaeger_token", &self.jaeger_token.as_ref().map(|_| "<redacted>"))
            .field("prometheus", &self.prometheus)
            .field("log_format", &self.log_format)
            .field("disabled_instrumentations", &self.disabled_instrumentations)
            .finish()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debug: false,
            app_name: None,
            jaeger: None,
            jaeger_token: None,
            prometheus: PrometheusConfig::default(),
            log_format: LogFormat::default(),
            disabled_instrumentations: DEFAULT_DISABLED_INSTRUMENTATIONS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Listen port; `0` leaves the choice to the exporter default.
    pub port: u16,
}

impl PrometheusConfig {
    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            enabled: flag(lookup(ENV_PROMETHEUS_ENABLED)),
            endpoint: non_empty(lookup(ENV_PROMETHEUS_ENDPOINT))
                .unwrap_or_else(|| DEFAULT_PROMETHEUS_ENDPOINT.to_string()),
            port: lookup(ENV_PROMETHEUS_PORT)
                .and_then(|raw| leading_port(&raw))
                .unwrap_or(0),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_PROMETHEUS_ENDPOINT.to_string(),
            port: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// Unknown values fall back to pretty output.
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PackageMetadata {
    name: Option<String>,
}

/// Resolve the application name from a package metadata file.
///
/// Failures are logged and produce `None`; startup continues either way.
pub fn application_name(path: &Path) -> Option<String> {
    match read_package_metadata(path) {
        Ok(metadata) => metadata.name,
        Err(err) => {
            tracing::error!(
                path = %path.display(),
                error = %err,
                "failed to resolve application name from package metadata"
            );
            None
        }
    }
}

fn read_package_metadata(path: &Path) -> Result<PackageMetadata, SettingsError> {
    let data = std::fs::read_to_string(path).map_err(|source| SettingsError::MetadataRead {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&data).map_err(|source| SettingsError::MetadataParse {
        path: path.to_path_buf(),
        source,
    })
}

fn flag(value: Option<String>) -> bool {
    value.as_deref() == Some("true")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Port from the leading decimal digits, so `"9464abc"` reads as 9464.
fn leading_port(raw: &str) -> Option<u16> {
    let raw = raw.trim_start();
    let end = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    raw[..end].parse().ok()
}

fn parse_strict<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, SettingsError> {
    raw.trim().parse().map_err(|_| SettingsError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}
