// src/error.rs

//! Unified error handling for the sync engine.

use std::fmt;

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Commerce backend could not be reached or refused the request
    #[error("Upstream unavailable ({context}): {message}")]
    UpstreamUnavailable { context: String, message: String },

    /// Commerce backend responded with data the client cannot interpret
    #[error("Upstream response malformed: {0}")]
    UpstreamMalformed(String),

    /// Messaging platform could not be reached or refused a whole batch
    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    /// The checkpoint store cannot be reached; run progress cannot be trusted
    #[error("Checkpoint store unavailable: {0}")]
    CheckpointUnavailable(String),

    /// Another sync run holds the exclusive run lock
    #[error("Sync run already in progress (held by {holder}, lease expires {expires_at})")]
    RunAlreadyInProgress { holder: String, expires_at: String },

    /// A resumed run's rebuilt catalog no longer matches the checkpoint
    #[error("Manifest mismatch: {0}")]
    ManifestMismatch(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl AppError {
    /// Create an upstream-unavailable error with context.
    pub fn upstream(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create an upstream-malformed error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::UpstreamMalformed(message.into())
    }

    /// Create a target-unavailable error.
    pub fn target(message: impl fmt::Display) -> Self {
        Self::TargetUnavailable(message.to_string())
    }

    /// Create a checkpoint-store error.
    pub fn checkpoint(message: impl fmt::Display) -> Self {
        Self::CheckpointUnavailable(message.to_string())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the orchestrator may retry the failed operation.
    ///
    /// Only transient network-class failures qualify. Malformed upstream
    /// data and checkpoint failures indicate the run cannot trust its own
    /// state and must escalate immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::TargetUnavailable(_)
        )
    }
}
