use std::time::Duration;

/// Typed error hierarchy for engine runs.
///
/// Every variant maps to a distinct, caller-safe [`user_message`]. Diagnostic
/// detail lives in the `Display` output and is only ever logged.
///
/// [`user_message`]: EngineError::user_message
#[derive(Clone, Debug, thiserror::Error)]
pub enum EngineError {
    /// Empty or invalid excerpt set, or fewer excerpts than the purpose needs.
    #[error("invalid input: {0}")]
    Input(String),

    /// Embedding or assistant provider failure.
    #[error("provider failure: {message}")]
    Provider {
        /// Diagnostic message from the provider.
        message: String,
        /// Whether the failure is transient.
        retryable: bool,
    },

    /// A statistical gate rejected every candidate.
    #[error("quality gate failed: {0}")]
    QualityGate(String),

    /// AI-call budget or deadline exhausted.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Bulkhead queue full or circuit open.
    #[error("resource exhausted: {resource} (retry after {retry_after:?})")]
    ResourceExhausted {
        /// Which pool rejected the request.
        resource: String,
        /// Earliest sensible retry.
        retry_after: Duration,
    },

    /// The run was cancelled by its caller.
    #[error("cancelled")]
    Cancelled,

    /// Invariant violation or unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Build a provider error.
    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            message: message.into(),
            retryable,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::Provider { .. } => "provider",
            Self::QualityGate(_) => "quality_gate",
            Self::BudgetExceeded(_) => "budget_exceeded",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Message safe to show to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Input(_) => {
                "The excerpt set is empty or too small for the selected research purpose."
            }
            Self::Provider { .. } => {
                "An embedding or assistant service is temporarily unavailable. Please try again."
            }
            Self::QualityGate(_) => {
                "No themes passed the statistical quality checks for this purpose."
            }
            Self::BudgetExceeded(_) => {
                "The analysis ran out of its time or AI budget before finishing."
            }
            Self::ResourceExhausted { .. } => {
                "Too many analyses are running right now. Please retry shortly."
            }
            Self::Cancelled => "The analysis was cancelled.",
            Self::Internal(_) => "Something went wrong while extracting themes.",
        }
    }

    /// Whether a retry might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::ResourceExhausted { .. } => true,
            _ => false,
        }
    }

    /// Whether this outcome should be counted against a circuit breaker.
    ///
    /// Caller mistakes and cancellations say nothing about service health.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::Input(_) | Self::Cancelled)
    }

    /// Server-suggested delay before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        if let Self::ResourceExhausted { retry_after, .. } = self {
            Some(*retry_after)
        } else {
            None
        }
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<EngineError> {
        vec![
            EngineError::Input("empty".into()),
            EngineError::provider("503", true),
            EngineError::QualityGate("ici".into()),
            EngineError::BudgetExceeded("deadline".into()),
            EngineError::ResourceExhausted {
                resource: "extraction".into(),
                retry_after: Duration::from_secs(30),
            },
            EngineError::Cancelled,
            EngineError::Internal("oops".into()),
        ]
    }

    #[test]
    fn user_messages_are_distinct() {
        let msgs: std::collections::HashSet<_> = all().iter().map(EngineError::user_message).collect();
        assert_eq!(msgs.len(), 7);
    }

    #[test]
    fn user_message_hides_diagnostics() {
        let err = EngineError::Internal("db password=hunter2".into());
        assert!(!err.user_message().contains("hunter2"));
        assert!(err.to_string().contains("hunter2"));
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds: std::collections::HashSet<_> = all().iter().map(EngineError::kind).collect();
        assert_eq!(kinds.len(), 7);
    }

    #[test]
    fn failure_accounting() {
        assert!(!EngineError::Input("x".into()).counts_as_failure());
        assert!(!EngineError::Cancelled.counts_as_failure());
        assert!(EngineError::provider("x", false).counts_as_failure());
        assert!(EngineError::Internal("x".into()).counts_as_failure());
    }

    #[test]
    fn retryability() {
        assert!(EngineError::provider("timeout", true).is_retryable());
        assert!(!EngineError::provider("401", false).is_retryable());
        assert!(!EngineError::Input("x".into()).is_retryable());
        let ex = EngineError::ResourceExhausted {
            resource: "search".into(),
            retry_after: Duration::from_secs(5),
        };
        assert_eq!(ex.retry_after(), Some(Duration::from_secs(5)));
    }
}
