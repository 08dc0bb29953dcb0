//! External service settings: embedding provider, assistant, caches.

use serde::{Deserialize, Serialize};

/// Which embedding backend to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Self-hosted text-embeddings server.
    #[default]
    Local,
    /// Remote OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
    /// Deterministic hash vectors (offline, tests).
    Hash,
}

/// Embedding provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingSettings {
    /// Backend selection.
    pub provider: EmbeddingProviderKind,
    /// Model identifier sent to the provider and stored on each embedding.
    pub model: String,
    /// Base URL of the local server.
    pub local_url: String,
    /// Base URL of the remote API.
    pub remote_url: String,
    /// Environment variable holding the remote API key.
    pub api_key_env: String,
    /// Output dimensions (hash provider, remote truncation).
    pub dimensions: usize,
    /// Texts per provider request.
    pub batch_size: usize,
    /// Concurrent requests against the local provider.
    pub local_concurrency: usize,
    /// Concurrent requests against the remote provider.
    pub remote_concurrency: usize,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Local,
            model: "BAAI/bge-small-en-v1.5".to_string(),
            local_url: "http://127.0.0.1:8080".to_string(),
            remote_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimensions: 384,
            batch_size: 32,
            local_concurrency: 50,
            remote_concurrency: 10,
            timeout_ms: 30_000,
        }
    }
}

/// Generative-text assistant settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantSettings {
    /// Whether assistant-backed steps are attempted at all.
    pub enabled: bool,
    /// Base URL of the OpenAI-compatible chat API.
    pub base_url: String,
    /// Chat model.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Completion token cap per call.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 60_000,
            max_tokens: 1_024,
            temperature: 0.2,
        }
    }
}

/// Embedding and semantic cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// Maximum cached embeddings.
    pub embedding_capacity: usize,
    /// Embedding entry lifetime.
    pub embedding_ttl_secs: u64,
    /// Whether whole-run results are cached.
    pub semantic_enabled: bool,
    /// Maximum cached run results.
    pub semantic_capacity: usize,
    /// Run result lifetime.
    pub semantic_ttl_secs: u64,
    /// Cosine similarity required for a semantic hit.
    pub semantic_threshold: f32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            embedding_capacity: 10_000,
            embedding_ttl_secs: 7 * 24 * 3600,
            semantic_enabled: true,
            semantic_capacity: 1_000,
            semantic_ttl_secs: 24 * 3600,
            semantic_threshold: 0.98,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_defaults() {
        let e = EmbeddingSettings::default();
        assert_eq!(e.provider, EmbeddingProviderKind::Local);
        assert_eq!(e.batch_size, 32);
        assert_eq!(e.local_concurrency, 50);
        assert_eq!(e.remote_concurrency, 10);
    }

    #[test]
    fn provider_kind_wire_names() {
        let k: EmbeddingProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(k, EmbeddingProviderKind::OpenAi);
        assert_eq!(serde_json::to_string(&EmbeddingProviderKind::Hash).unwrap(), "\"hash\"");
    }

    #[test]
    fn cache_defaults() {
        let c = CacheSettings::default();
        assert_eq!(c.semantic_capacity, 1_000);
        assert_eq!(c.semantic_ttl_secs, 86_400);
        assert!((c.semantic_threshold - 0.98).abs() < f32::EPSILON);
    }
}
