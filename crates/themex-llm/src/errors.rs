use std::time::Duration;

use themex_core::{EngineError, Retryable};

/// Typed error hierarchy for assistant calls.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum AssistantError {
    // Fatal, not retried
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout: {0}")]
    Timeout(String),

    // Operational
    #[error("cancelled")]
    Cancelled,
}

impl AssistantError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::InvalidResponse(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidResponse(_) => "invalid_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            429 => Self::RateLimited { retry_after },
            529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            400..=499 => Self::InvalidRequest(body),
            _ => Self::InvalidResponse(format!("unexpected status {status}: {body}")),
        }
    }
}

impl Retryable for AssistantError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::ProviderOverloaded
                | Self::NetworkError(_)
                | Self::Timeout(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}

impl From<AssistantError> for EngineError {
    fn from(err: AssistantError) -> Self {
        match err {
            AssistantError::Cancelled => EngineError::Cancelled,
            other => {
                let retryable = other.is_retryable();
                EngineError::provider(other.to_string(), retryable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AssistantError::RateLimited { retry_after: None }.is_retryable());
        assert!(AssistantError::ServerError { status: 500, body: "err".into() }.is_retryable());
        assert!(AssistantError::ProviderOverloaded.is_retryable());
        assert!(AssistantError::NetworkError("tcp".into()).is_retryable());
        assert!(AssistantError::Timeout("60s".into()).is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(AssistantError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(AssistantError::InvalidRequest("bad".into()).is_fatal());
        assert!(!AssistantError::Cancelled.is_fatal());
        assert!(!AssistantError::Cancelled.is_retryable());
    }

    #[test]
    fn from_status_mapping() {
        assert!(AssistantError::from_status(401, String::new(), None).is_fatal());
        assert!(AssistantError::from_status(422, String::new(), None).is_fatal());
        assert!(AssistantError::from_status(429, String::new(), None).is_retryable());
        assert!(AssistantError::from_status(529, String::new(), None).is_retryable());
        assert!(AssistantError::from_status(502, String::new(), None).is_retryable());
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = AssistantError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(rl.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(AssistantError::ProviderOverloaded.retry_after(), None);
    }

    #[test]
    fn cancellation_maps_to_engine_cancelled() {
        let e: EngineError = AssistantError::Cancelled.into();
        assert!(matches!(e, EngineError::Cancelled));
        let e: EngineError = AssistantError::ProviderOverloaded.into();
        assert!(e.is_retryable());
    }
}
