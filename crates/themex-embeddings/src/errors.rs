//! Embedding error types.
//!
//! Provider errors bubble up to the caller unchanged; whether to retry or
//! abandon is decided there, guided by [`Retryable`].

use std::time::Duration;

use themex_core::{EngineError, Retryable};
use thiserror::Error;

/// Errors from embedding operations.
#[derive(Clone, Debug, Error)]
pub enum EmbeddingError {
    /// Non-success HTTP status other than 429.
    #[error("embedding provider returned {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The provider is throttling us.
    #[error("embedding provider rate limited")]
    RateLimited {
        /// Server-suggested delay.
        retry_after: Option<Duration>,
    },

    /// Request did not complete in time.
    #[error("embedding request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("embedding network error: {0}")]
    Network(String),

    /// The response could not be understood.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    /// Misconfiguration (missing key, bad URL).
    #[error("embedding config error: {0}")]
    Config(String),
}

impl EmbeddingError {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        if status == 429 {
            Self::RateLimited { retry_after }
        } else {
            Self::Http {
                status,
                body: truncate(body, 512),
            }
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Config(_) => "config",
        }
    }
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::InvalidResponse(_) | Self::Config(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<EmbeddingError> for EngineError {
    fn from(err: EmbeddingError) -> Self {
        let retryable = err.is_retryable();
        EngineError::provider(err.to_string(), retryable)
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

/// Result alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(EmbeddingError::from_status(500, "boom".into(), None).is_retryable());
        assert!(EmbeddingError::from_status(503, "busy".into(), None).is_retryable());
        assert!(EmbeddingError::from_status(429, String::new(), None).is_retryable());
        assert!(!EmbeddingError::from_status(400, "bad".into(), None).is_retryable());
        assert!(!EmbeddingError::from_status(401, "key".into(), None).is_retryable());
    }

    #[test]
    fn transport_errors_retryable() {
        assert!(EmbeddingError::Timeout("30s".into()).is_retryable());
        assert!(EmbeddingError::Network("reset".into()).is_retryable());
        assert!(!EmbeddingError::InvalidResponse("shape".into()).is_retryable());
        assert!(!EmbeddingError::Config("no key".into()).is_retryable());
    }

    #[test]
    fn rate_limit_carries_delay() {
        let e = EmbeddingError::from_status(429, String::new(), Some(Duration::from_secs(3)));
        assert_eq!(e.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(e.error_kind(), "rate_limited");
    }

    #[test]
    fn long_bodies_truncated() {
        let e = EmbeddingError::from_status(500, "é".repeat(400), None);
        let EmbeddingError::Http { body, .. } = e else {
            panic!("expected Http");
        };
        assert!(body.len() <= 512);
    }

    #[test]
    fn converts_into_engine_error() {
        let e: EngineError = EmbeddingError::Network("x".into()).into();
        assert!(e.is_retryable());
        assert_eq!(e.kind(), "provider");
    }
}
