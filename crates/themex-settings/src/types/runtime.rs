//! Run limits, bulkhead sizing, logging.

use serde::{Deserialize, Serialize};

/// Per-run limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunSettings {
    /// AI calls a single run may make.
    pub ai_call_budget: u32,
    /// Wall-clock limit per run.
    pub timeout_secs: u64,
    /// Seed for clustering and permutation steps.
    pub seed: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            ai_call_budget: 20,
            timeout_secs: 300,
            seed: 42,
        }
    }
}

/// Concurrency limits and circuit breaker tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BulkheadSettings {
    /// Concurrent searches per user.
    pub search_per_user: usize,
    /// Concurrent searches overall.
    pub search_global: usize,
    /// Concurrent extractions per user.
    pub extraction_per_user: usize,
    /// Concurrent extractions overall.
    pub extraction_global: usize,
    /// Waiting requests allowed per user, as a multiple of the per-user limit.
    pub queue_multiplier: usize,
    /// Consecutive failures that open a circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects before probing.
    pub cooldown_secs: u64,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self {
            search_per_user: 3,
            search_global: 50,
            extraction_per_user: 1,
            extraction_global: 10,
            queue_multiplier: 2,
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulkhead_defaults() {
        let b = BulkheadSettings::default();
        assert_eq!((b.search_per_user, b.search_global), (3, 50));
        assert_eq!((b.extraction_per_user, b.extraction_global), (1, 10));
        assert_eq!(b.failure_threshold, 5);
    }

    #[test]
    fn partial_run_json() {
        let r: RunSettings = serde_json::from_str(r#"{"seed": 7}"#).unwrap();
        assert_eq!(r.seed, 7);
        assert_eq!(r.ai_call_budget, 20);
    }
}
