//! Huginn error types

use std::time::Duration;

/// Huginn error types
#[derive(Debug, thiserror::Error)]
pub enum HuginnError {
    // Input errors
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    // Timing errors
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("lock acquisition timed out after {after:?}")]
    LockTimeout { after: Duration },

    // Resolver errors
    #[error("capability error: {0}")]
    Capability(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    // Service state errors
    /// Circuit breaker is open; the resolver was not called.
    #[error("service temporarily unavailable")]
    ServiceUnavailable,

    #[error("service has been disposed")]
    Disposed,

    /// Retries were exhausted. `source` is the error from the final attempt.
    #[error("operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        source: Box<HuginnError>,
    },

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("memory sampling failed: {0}")]
    MemorySample(String),
}

impl HuginnError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::RateLimited { .. } => "RATE_LIMIT_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT_ERROR",
            Self::Capability(_) => "CAPABILITY_ERROR",
            Self::InvalidModel(_) => "INVALID_MODEL",
            Self::InvalidCapability(_) => "INVALID_CAPABILITY",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Disposed => "SERVICE_DISPOSED",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Telemetry(_) => "TELEMETRY_ERROR",
            Self::MemorySample(_) => "MEMORY_SAMPLE_ERROR",
        }
    }

    /// Whether the retry handler should attempt the operation again.
    ///
    /// Timeouts and resolver failures are transient. Validation, rate-limit,
    /// open-circuit and disposal errors are permanent: retrying them cannot
    /// change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::LockTimeout { .. }
                | Self::Capability(_)
                | Self::InvalidModel(_)
                | Self::InvalidCapability(_)
        )
    }

    /// Suggested wait before retrying, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Display message reduced to ASCII alphanumerics and spaces.
    ///
    /// Used when the message may echo caller input into logs.
    pub fn sanitized(&self) -> String {
        self.to_string()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
            .collect()
    }

    /// Strip `RetryExhausted` wrappers, returning the original error.
    pub fn into_root(self) -> Self {
        match self {
            Self::RetryExhausted { source, .. } => source.into_root(),
            other => other,
        }
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
