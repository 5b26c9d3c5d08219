//! Error types for Hent.

use std::time::Duration;
use thiserror::Error;

/// Library-level error type for Hent operations.
#[derive(Error, Debug)]
pub enum HentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown strategy '{0}' in podcast configuration")]
    UnknownStrategy(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("State snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl HentError {
    /// Configuration problems are the only errors allowed to reach the batch caller.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            HentError::Config(_) | HentError::UnknownStrategy(_) | HentError::MissingCredential(_)
        )
    }
}

/// Failure of a single network call or download attempt against a source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Timeouts, resets and 5xx responses. Eligible for retry.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// HTTP 429 or an equivalent provider signal.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// 404/410 and friends. Never retried, the chain moves on.
    #[error("permanent source error: {0}")]
    PermanentSource(String),

    /// The resource arrived but is not usable audio.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("cancelled")]
    Cancelled,
}

impl SourceError {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16, url: &str, retry_after: Option<Duration>) -> Self {
        match status {
            429 => SourceError::RateLimited {
                message: format!("HTTP 429 from {}", url),
                retry_after,
            },
            408 | 500..=599 => {
                SourceError::TransientNetwork(format!("HTTP {} from {}", status, url))
            }
            _ => SourceError::PermanentSource(format!("HTTP {} from {}", status, url)),
        }
    }

    /// Whether a retry wrapper may try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::TransientNetwork(_) | SourceError::RateLimited { .. }
        )
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. })
    }

    /// Provider supplied `Retry-After` hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            let url = e.url().map(|u| u.to_string()).unwrap_or_default();
            return SourceError::from_status(status.as_u16(), &url, None);
        }
        if e.is_builder() {
            return SourceError::PermanentSource(e.to_string());
        }
        // Timeouts, connect failures and truncated bodies can all recover.
        SourceError::TransientNetwork(e.to_string())
    }
}

/// Parse a `Retry-After` header value given in seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Result type alias for Hent operations.
pub type Result<T> = std::result::Result<T, HentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            SourceError::from_status(404, "u", None),
            SourceError::PermanentSource(_)
        ));
        assert!(matches!(
            SourceError::from_status(410, "u", None),
            SourceError::PermanentSource(_)
        ));
        assert!(SourceError::from_status(503, "u", None).is_retryable());
        assert!(SourceError::from_status(408, "u", None).is_retryable());

        let limited = SourceError::from_status(429, "u", Some(Duration::from_secs(7)));
        assert!(limited.is_rate_limit());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_config_errors() {
        assert!(HentError::UnknownStrategy("x".into()).is_config());
        assert!(HentError::MissingCredential("k".into()).is_config());
        assert!(!HentError::Cancelled.is_config());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
