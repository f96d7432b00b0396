//! Error types for Threatlens

use serde::Serialize;

/// Result type alias using Threatlens's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that surface to the caller of an assessment.
///
/// Provider-level failures never appear here; they are recovered inside the
/// engine and reported as [`ProviderError`] markers on the verdict.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller cancelled the assessment
    #[error("assessment cancelled")]
    Cancelled,

    /// No provider answered and no local heuristic is installed
    #[error("no verdict source available: no provider responded and no heuristic is installed")]
    NoVerdictSource,

    /// Malformed fingerprint digests
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new fingerprint error
    pub fn fingerprint(msg: impl Into<String>) -> Self {
        Self::InvalidFingerprint(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Failure of a single provider lookup.
///
/// Every kind degrades that provider's contribution to "no verdict"; none of
/// them aborts an assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    /// Network, HTTP or authentication failure
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The lookup did not finish within the per-call timeout
    #[error("provider timed out")]
    Timeout,

    /// The provider's per-minute or per-day quota is spent
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// The provider's circuit breaker is open
    #[error("circuit open")]
    CircuitOpen,

    /// The provider is enabled but lacks credentials or settings
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),
}

impl ProviderError {
    /// Create a new unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a new configuration-missing error
    pub fn configuration_missing(msg: impl Into<String>) -> Self {
        Self::ConfigurationMissing(msg.into())
    }

    /// Whether this failure means an outbound call was attempted and failed.
    ///
    /// Only these count against the circuit breaker.
    pub fn is_call_failure(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}
