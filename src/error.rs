use std::io;

use thiserror::Error;

use crate::types::EntityClass;

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A configured source could not be opened or read. The run skips it.
    #[error("source unavailable: {source_label}: {reason}")]
    SourceUnavailable {
        source_label: String,
        #[source]
        reason: io::Error,
    },

    #[error("no readable source (attempted: {})", .attempted.join(", "))]
    NoReadableSource { attempted: Vec<String> },

    #[error("invalid {class} pattern {pattern:?}: {reason}")]
    InvalidPattern {
        class: EntityClass,
        pattern: String,
        #[source]
        reason: regex::Error,
    },

    #[error("invalid pattern config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("rendering failed: {0}")]
    Format(#[from] std::fmt::Error),
}

pub type Result<T, E = RecoveryError> = std::result::Result<T, E>;
