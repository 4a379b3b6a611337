use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpSyncError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "Invalid server name: {0}. Use only alphanumeric characters, hyphens, and underscores."
    )]
    InvalidServerName(String),

    #[error("{message} (hint: {hint})")]
    InvalidInput { message: String, hint: String },

    #[error("Server '{name}' not found in central configuration")]
    ServerNotFound { name: String, available: Vec<String> },

    #[error("Failed to save central configuration at {path}: {reason}")]
    CentralSaveFailed { path: PathBuf, reason: String },
}

impl McpSyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_input(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            hint: hint.into(),
        }
    }
}
