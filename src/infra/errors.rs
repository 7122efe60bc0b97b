// src/infra/errors.rs — Error types for Fieldwatch

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FieldwatchError {
    // Classification collaborator
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("No classification provider configured. Set ANTHROPIC_API_KEY or OPENAI_API_KEY.")]
    NoProvider,

    #[error("Malformed classification response: {0}")]
    MalformedResponse(String),

    // Real-time channel
    #[error("Not connected")]
    NotConnected,

    #[error("Registration not acknowledged within {after_ms}ms")]
    RegistrationTimeout { after_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session '{session_id}' has ended")]
    SessionClosed { session_id: String },

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FieldwatchError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FieldwatchError::Provider {
                retriable: true,
                ..
            } | FieldwatchError::RateLimited { .. }
        )
    }

    /// Connectivity failures that the connection manager recovers from on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FieldwatchError::Transport(_)
                | FieldwatchError::NotConnected
                | FieldwatchError::RegistrationTimeout { .. }
        )
    }
}
