//! Error types for Weave operations.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a failure affects the candidate that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeouts, resets, rate limits, server hiccups. Retried on the same candidate.
    Transient,
    /// The candidate rejected our credential.
    Authentication,
    /// Malformed endpoint, unknown model, unsupported operation for this backend.
    Configuration,
    /// The backend refused the payload itself.
    ContentPolicy,
}

impl FailureKind {
    /// Whether the orchestrator may retry in place.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Transient => "transient",
            FailureKind::Authentication => "authentication",
            FailureKind::Configuration => "configuration",
            FailureKind::ContentPolicy => "content_policy",
        };
        f.write_str(s)
    }
}

/// The main error type for Weave operations.
#[derive(Debug, thiserror::Error)]
pub enum WeaveError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Rate limit errors
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The backend refused the content
    #[error("Content policy rejection: {0}")]
    ContentPolicy(String),

    /// Model not found errors
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Timeout errors
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Upstream 5xx or equivalent provider-side failure
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Response envelope we could not make sense of
    #[error("Provider error: {0}")]
    Provider(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Stream errors
    #[error("Stream error: {0}")]
    Stream(String),

    /// Unsupported operation errors
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A request with this id is already executing
    #[error("Duplicate request id: {0}")]
    DuplicateRequest(String),

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl WeaveError {
    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create an authentication error
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limit(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            message: msg.into(),
            retry_after,
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a content policy error
    pub fn content_policy(msg: impl Into<String>) -> Self {
        Self::ContentPolicy(msg.into())
    }

    /// Create a model not found error
    pub fn model_not_found(msg: impl Into<String>) -> Self {
        Self::ModelNotFound(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a server error
    pub fn server(status: u16, msg: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Classify this error for the retry/fallback state machine.
    pub fn kind(&self) -> FailureKind {
        match self {
            WeaveError::Network(e) if e.is_builder() => FailureKind::Configuration,
            WeaveError::Network(e) if e.is_decode() => FailureKind::Configuration,
            WeaveError::Network(_)
            | WeaveError::Timeout(_)
            | WeaveError::RateLimit { .. }
            | WeaveError::Server { .. }
            | WeaveError::Stream(_) => FailureKind::Transient,
            WeaveError::Authentication(_) => FailureKind::Authentication,
            WeaveError::ContentPolicy(_) => FailureKind::ContentPolicy,
            WeaveError::Serialization(_)
            | WeaveError::InvalidRequest(_)
            | WeaveError::ModelNotFound(_)
            | WeaveError::Provider(_)
            | WeaveError::Configuration(_)
            | WeaveError::Unsupported(_)
            | WeaveError::DuplicateRequest(_)
            | WeaveError::Other(_) => FailureKind::Configuration,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }

    /// Server-advised wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            WeaveError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
