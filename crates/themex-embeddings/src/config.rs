//! Embedding configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use themex_settings::{CacheSettings, EmbeddingProviderKind, EmbeddingSettings};

/// Resolved configuration for providers, cache and orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingConfig {
    /// Backend selection.
    pub provider: EmbeddingProviderKind,
    /// Model identifier.
    pub model: String,
    /// Local server base URL.
    pub local_url: String,
    /// Remote API base URL.
    pub remote_url: String,
    /// Environment variable holding the remote API key.
    pub api_key_env: String,
    /// Output dimensions.
    pub dimensions: usize,
    /// Texts per provider request.
    pub batch_size: usize,
    /// Fan-out against the local provider.
    pub local_concurrency: usize,
    /// Fan-out against the remote provider.
    pub remote_concurrency: usize,
    /// Per-request timeout in ms.
    pub timeout_ms: u64,
    /// Cache capacity.
    pub cache_capacity: usize,
    /// Cache entry lifetime in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::from_settings(&EmbeddingSettings::default(), &CacheSettings::default())
    }
}

impl EmbeddingConfig {
    /// Create config from settings.
    pub fn from_settings(e: &EmbeddingSettings, c: &CacheSettings) -> Self {
        Self {
            provider: e.provider,
            model: e.model.clone(),
            local_url: e.local_url.clone(),
            remote_url: e.remote_url.clone(),
            api_key_env: e.api_key_env.clone(),
            dimensions: e.dimensions,
            batch_size: e.batch_size.max(1),
            local_concurrency: e.local_concurrency.max(1),
            remote_concurrency: e.remote_concurrency.max(1),
            timeout_ms: e.timeout_ms,
            cache_capacity: c.embedding_capacity,
            cache_ttl_secs: c.embedding_ttl_secs,
        }
    }

    /// Deterministic offline configuration.
    pub fn hash(dimensions: usize) -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            model: format!("hash-{dimensions}"),
            dimensions,
            ..Self::default()
        }
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Cache entry lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
