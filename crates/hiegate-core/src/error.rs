use thiserror::Error;

/// Core error taxonomy for gateway operations.
///
/// Configuration and matching problems are fatal to a single dispatch only,
/// never to the worker; transport-level problems are recovered per route.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error on route '{route}': {message}")]
    Transport { route: String, message: String },

    #[error("Route '{route}' timed out after {after_ms}ms")]
    Timeout { route: String, after_ms: u64 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Match error: {0}")]
    Match(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl CoreError {
    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new Transport error for a named route
    pub fn transport(route: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            route: route.into(),
            message: message.into(),
        }
    }

    /// Create a new Timeout error for a named route
    pub fn timeout(route: impl Into<String>, after_ms: u64) -> Self {
        Self::Timeout {
            route: route.into(),
            after_ms,
        }
    }

    /// Create a new Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a new Certificate error
    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate(message.into())
    }

    /// Create a new Match error
    pub fn match_error(message: impl Into<String>) -> Self {
        Self::Match(message.into())
    }

    /// Whether this error marks a route outcome as eligible for external retry.
    ///
    /// Transport and timeout failures are retryable; configuration and match
    /// problems are not (retrying cannot fix a bad channel definition).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Protocol(_)
        )
    }
}

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;
