//! Embedding orchestrator: cache lookup, batched fan-out, validation.
//!
//! Every vector that leaves the orchestrator went through
//! [`Embedding::with_norm`]. Vectors with a non-finite or non-positive norm
//! are logged, counted and dropped (`None` in batch results); they are never
//! zero-filled or passed on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use themex_core::Embedding;
use themex_core::vector::l2_norm;
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::errors::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, ProviderKind, build_provider};

/// Default fan-out against a local provider.
pub const LOCAL_CONCURRENCY: usize = 50;
/// Default fan-out against a remote, rate-limited provider.
pub const REMOTE_CONCURRENCY: usize = 10;
/// Default texts per provider request.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Static description of the active provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    /// Provider name.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Output dimensions, if known.
    pub dimensions: Option<usize>,
    /// Locality class.
    pub kind: ProviderKind,
}

/// Result of a batch call with accounting.
#[derive(Clone, Debug, Default)]
pub struct BatchEmbeddings {
    /// Aligned with the input texts.
    pub embeddings: Vec<Option<Embedding>>,
    /// Texts served from cache.
    pub cache_hits: u64,
    /// Vectors produced by the provider and accepted.
    pub generated: u64,
    /// Vectors produced by the provider and rejected.
    pub rejected: u64,
}

/// Coordinates the cache and a provider.
pub struct EmbeddingOrchestrator {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    batch_size: usize,
    concurrency: usize,
    info: OnceLock<ProviderInfo>,
    rejected: AtomicU64,
}

impl std::fmt::Debug for EmbeddingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingOrchestrator")
            .field("provider", &self.provider.name())
            .field("batch_size", &self.batch_size)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl EmbeddingOrchestrator {
    /// Wrap `provider` with `cache`, using fan-out suited to its kind.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Arc<EmbeddingCache>) -> Self {
        let concurrency = match provider.kind() {
            ProviderKind::Local => LOCAL_CONCURRENCY,
            ProviderKind::Remote => REMOTE_CONCURRENCY,
        };
        Self {
            provider,
            cache,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency,
            info: OnceLock::new(),
            rejected: AtomicU64::new(0),
        }
    }

    /// Build provider and cache from configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = build_provider(config)?;
        let cache = Arc::new(EmbeddingCache::new(config.cache_capacity, config.cache_ttl()));
        let concurrency = match provider.kind() {
            ProviderKind::Local => config.local_concurrency,
            ProviderKind::Remote => config.remote_concurrency,
        };
        Ok(Self::new(provider, cache)
            .with_batch_size(config.batch_size)
            .with_concurrency(concurrency))
    }

    /// Override texts per provider request.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Override fan-out.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Provider description, computed once.
    pub fn provider_info(&self) -> &ProviderInfo {
        self.info.get_or_init(|| ProviderInfo {
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            dimensions: self.provider.dimensions(),
            kind: self.provider.kind(),
        })
    }

    /// L2 magnitude of a raw vector.
    pub fn magnitude(vector: &[f32]) -> f32 {
        l2_norm(vector)
    }

    /// Vectors rejected since construction.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Embed a single text.
    pub async fn generate(&self, text: &str) -> Result<Embedding> {
        let batch = self.generate_batch(&[text.to_string()]).await?;
        batch.into_iter().next().flatten().ok_or_else(|| {
            EmbeddingError::InvalidResponse("provider returned an invalid vector".into())
        })
    }

    /// Embed many texts; invalid vectors come back as `None`.
    pub async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Option<Embedding>>> {
        Ok(self.generate_batch_with_stats(texts).await?.embeddings)
    }

    /// Embed many texts and report cache and rejection counts.
    pub async fn generate_batch_with_stats(&self, texts: &[String]) -> Result<BatchEmbeddings> {
        let model = self.provider.model().to_string();
        let mut out = BatchEmbeddings {
            embeddings: vec![None; texts.len()],
            ..BatchEmbeddings::default()
        };

        // Deduplicate misses so repeated texts cost one provider slot.
        let mut pending: Vec<String> = Vec::new();
        let mut positions: Vec<Vec<usize>> = Vec::new();
        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        for (i, text) in texts.iter().enumerate() {
            if let Some(&slot) = slot_of.get(text.as_str()) {
                positions[slot].push(i);
                continue;
            }
            if let Some(hit) = self.cache.get(&model, text) {
                out.embeddings[i] = Some(hit);
                out.cache_hits += 1;
                continue;
            }
            let _ = slot_of.insert(text.as_str(), pending.len());
            pending.push(text.clone());
            positions.push(vec![i]);
        }

        if pending.is_empty() {
            return Ok(out);
        }

        debug!(
            total = texts.len(),
            misses = pending.len(),
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            "embedding cache misses"
        );

        let provider = &self.provider;
        let chunks: Vec<(usize, &[String])> = pending
            .chunks(self.batch_size)
            .enumerate()
            .map(|(ci, chunk)| (ci * self.batch_size, chunk))
            .collect();
        // Futures are built eagerly (they stay lazy until polled) so the
        // stream type carries no closure, which keeps the future `Send`.
        let requests: Vec<_> = chunks
            .into_iter()
            .map(|(offset, chunk)| async move {
                provider.embed_batch(chunk).await.map(|vectors| (offset, vectors))
            })
            .collect();
        let results: Vec<(usize, Vec<Vec<f32>>)> = stream::iter(requests)
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let expected_dims = self.provider.dimensions();
        for (offset, vectors) in results {
            for (j, vector) in vectors.into_iter().enumerate() {
                let slot = offset + j;
                let text = &pending[slot];
                if let Some(d) = expected_dims {
                    if vector.len() != d {
                        self.reject(text, &format!("expected {d} dimensions, got {}", vector.len()));
                        out.rejected += 1;
                        continue;
                    }
                }
                match Embedding::with_norm(vector, model.as_str()) {
                    Ok(embedding) => {
                        self.cache.insert(&model, text, embedding.clone());
                        for &i in &positions[slot] {
                            out.embeddings[i] = Some(embedding.clone());
                        }
                        out.generated += 1;
                    }
                    Err(e) => {
                        self.reject(text, &e.to_string());
                        out.rejected += 1;
                    }
                }
            }
        }
        Ok(out)
    }

    fn reject(&self, text: &str, reason: &str) {
        let _ = self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("themex_embeddings_rejected_total").increment(1);
        warn!(
            provider = self.provider.name(),
            text_len = text.len(),
            reason,
            "rejecting invalid embedding"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::HashEmbeddingProvider;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counts calls and poisons texts starting with "nan"/"zero".
    struct ScriptedProvider {
        calls: AtomicUsize,
        texts_seen: AtomicUsize,
        kind: ProviderKind,
        fail: bool,
    }

    impl ScriptedProvider {
        fn new(kind: ProviderKind) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                texts_seen: AtomicUsize::new(0),
                kind,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        fn model(&self) -> &str {
            "scripted-3"
        }
        fn kind(&self) -> ProviderKind {
            self.kind
        }
        fn dimensions(&self) -> Option<usize> {
            Some(3)
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::from_status(503, "down".into(), None));
            }
            Ok(texts
                .iter()
                .map(|t| {
                    if t.starts_with("nan") {
                        vec![f32::NAN, 1.0, 0.0]
                    } else if t.starts_with("zero") {
                        vec![0.0, 0.0, 0.0]
                    } else if t.starts_with("short") {
                        vec![1.0]
                    } else {
                        vec![t.len() as f32, 1.0, 0.5]
                    }
                })
                .collect())
        }
    }

    fn orchestrator(p: Arc<ScriptedProvider>) -> EmbeddingOrchestrator {
        EmbeddingOrchestrator::new(p, Arc::new(EmbeddingCache::new(100, Duration::from_secs(60))))
    }

    fn texts(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn batch_is_aligned_and_drops_invalid() {
        let p = Arc::new(ScriptedProvider::new(ProviderKind::Local));
        let o = orchestrator(Arc::clone(&p));
        let out = o
            .generate_batch_with_stats(&texts(&["alpha", "nan-1", "beta", "zero-1", "short"]))
            .await
            .unwrap();
        assert_eq!(out.embeddings.len(), 5);
        assert!(out.embeddings[0].is_some());
        assert!(out.embeddings[1].is_none());
        assert!(out.embeddings[2].is_some());
        assert!(out.embeddings[3].is_none());
        assert!(out.embeddings[4].is_none());
        assert_eq!(out.rejected, 3);
        assert_eq!(out.generated, 2);
        assert_eq!(o.rejected_count(), 3);
        for e in out.embeddings.iter().flatten() {
            assert!(e.norm().is_finite() && e.norm() > 0.0);
        }
    }

    #[tokio::test]
    async fn second_call_served_from_cache_sharing_buffer() {
        let p = Arc::new(ScriptedProvider::new(ProviderKind::Local));
        let o = orchestrator(Arc::clone(&p));
        let first = o.generate("alpha").await.unwrap();
        let second = o.generate("alpha").await.unwrap();
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
        assert!(first.shares_buffer_with(&second));
        assert_eq!(o.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn duplicate_texts_embedded_once() {
        let p = Arc::new(ScriptedProvider::new(ProviderKind::Local));
        let o = orchestrator(Arc::clone(&p));
        let out = o.generate_batch(&texts(&["same", "same", "other"])).await.unwrap();
        assert_eq!(p.texts_seen.load(Ordering::SeqCst), 2);
        let (a, b) = (out[0].as_ref().unwrap(), out[1].as_ref().unwrap());
        assert!(a.shares_buffer_with(b));
    }

    #[tokio::test]
    async fn misses_are_chunked() {
        let p = Arc::new(ScriptedProvider::new(ProviderKind::Remote));
        let o = orchestrator(Arc::clone(&p)).with_batch_size(4);
        let input: Vec<String> = (0..10).map(|i| format!("text-{i}")).collect();
        let out = o.generate_batch(&input).await.unwrap();
        assert_eq!(p.calls.load(Ordering::SeqCst), 3);
        assert!(out.iter().all(Option::is_some));
        // Alignment survives unordered completion.
        assert_eq!(out[9].as_ref().unwrap().vector()[0], "text-9".len() as f32);
    }

    #[tokio::test]
    async fn provider_errors_bubble_up() {
        let mut p = ScriptedProvider::new(ProviderKind::Local);
        p.fail = true;
        let o = orchestrator(Arc::new(p));
        let err = o.generate("x").await.unwrap_err();
        assert_matches!(err, EmbeddingError::Http { status: 503, .. });
    }

    #[tokio::test]
    async fn single_invalid_is_error() {
        let o = orchestrator(Arc::new(ScriptedProvider::new(ProviderKind::Local)));
        assert_matches!(o.generate("nan").await, Err(EmbeddingError::InvalidResponse(_)));
    }

    #[test]
    fn concurrency_follows_kind() {
        let local = orchestrator(Arc::new(ScriptedProvider::new(ProviderKind::Local)));
        let remote = orchestrator(Arc::new(ScriptedProvider::new(ProviderKind::Remote)));
        assert_eq!(local.concurrency, LOCAL_CONCURRENCY);
        assert_eq!(remote.concurrency, REMOTE_CONCURRENCY);
    }

    #[test]
    fn provider_info_cached() {
        let o = EmbeddingOrchestrator::from_config(&EmbeddingConfig::hash(8)).unwrap();
        let a = o.provider_info() as *const ProviderInfo;
        let b = o.provider_info() as *const ProviderInfo;
        assert_eq!(a, b);
        assert_eq!(o.provider_info().dimensions, Some(8));
        assert_eq!(o.provider_info().provider, "hash");
    }

    #[test]
    fn magnitude_matches_norm() {
        assert!((EmbeddingOrchestrator::magnitude(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn hash_provider_end_to_end() {
        let o = EmbeddingOrchestrator::new(
            Arc::new(HashEmbeddingProvider::new(32)),
            Arc::new(EmbeddingCache::new(10, Duration::from_secs(10))),
        );
        let e = o.generate("hello world").await.unwrap();
        assert_eq!(e.dimensions(), 32);
        assert_eq!(e.model(), "hash-32");
    }
}
