//! Embedding provider adapters.
//!
//! A provider turns a batch of texts into raw vectors. It does no caching,
//! validation or fan-out; the orchestrator owns all of that.

mod hash;
mod local;
mod openai;

pub use hash::HashEmbeddingProvider;
pub use local::LocalEmbeddingProvider;
pub use openai::OpenAiEmbeddingProvider;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use themex_settings::EmbeddingProviderKind;

use crate::config::EmbeddingConfig;
use crate::errors::{EmbeddingError, Result};

/// Where a provider runs, which decides how hard we may hit it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Self-hosted or in-process; high fan-out.
    Local,
    /// Remote and rate limited; low fan-out.
    Remote,
}

/// Backend that produces raw embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logs and [`ProviderInfo`](crate::ProviderInfo).
    fn name(&self) -> &str;

    /// Model identifier stamped onto every embedding.
    fn model(&self) -> &str;

    /// Locality class.
    fn kind(&self) -> ProviderKind;

    /// Output dimensions, when known up front.
    fn dimensions(&self) -> Option<usize>;

    /// Embed a batch. The result is aligned with `texts`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the provider selected by `config`.
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider {
        EmbeddingProviderKind::Local => Ok(Arc::new(LocalEmbeddingProvider::new(
            &config.local_url,
            &config.model,
            config.timeout(),
        )?)),
        EmbeddingProviderKind::OpenAi => {
            let key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    EmbeddingError::Config(format!("{} is not set", config.api_key_env))
                })?;
            Ok(Arc::new(OpenAiEmbeddingProvider::new(
                &key,
                &config.remote_url,
                &config.model,
                Some(config.dimensions),
                config.timeout(),
            )?))
        }
        EmbeddingProviderKind::Hash => Ok(Arc::new(HashEmbeddingProvider::with_model(
            config.dimensions,
            &config.model,
        ))),
    }
}

/// Read an optional `Retry-After` header.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<std::time::Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(themex_core::retry::parse_retry_after)
}

/// Fail unless the provider returned exactly one vector per input.
pub(crate) fn ensure_aligned(expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(EmbeddingError::InvalidResponse(format!(
            "provider returned {got} embeddings for {expected} inputs"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn build_hash_provider() {
        let p = build_provider(&EmbeddingConfig::hash(16)).unwrap();
        assert_eq!(p.kind(), ProviderKind::Local);
        assert_eq!(p.dimensions(), Some(16));
        assert_eq!(p.name(), "hash");
    }

    #[test]
    fn build_openai_without_key_fails() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderKind::OpenAi,
            api_key_env: "THEMEX_TEST_DEFINITELY_UNSET_KEY".into(),
            ..EmbeddingConfig::default()
        };
        assert_matches!(build_provider(&config).err(), Some(EmbeddingError::Config(_)));
    }

    #[test]
    fn alignment_check() {
        assert!(ensure_aligned(3, 3).is_ok());
        assert_matches!(ensure_aligned(3, 2), Err(EmbeddingError::InvalidResponse(_)));
    }
}
