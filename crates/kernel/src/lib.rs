//! Process settings for rbx services: server binding and telemetry switches.

pub mod error;
pub mod settings;

pub use error::SettingsError;
pub use settings::{LogFormat, PrometheusConfig, ServerSettings, Settings, TelemetryConfig};
