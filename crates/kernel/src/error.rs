use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling process settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to read {}: {source}", path.display())]
    MetadataRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    MetadataParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
