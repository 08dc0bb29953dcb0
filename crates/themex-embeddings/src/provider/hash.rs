//! Deterministic SHA-256 feature-hashing provider.
//!
//! Each lowercase word token is hashed into a signed slot, so texts sharing
//! vocabulary land near each other. Texts with no word tokens fall back to a
//! vector seeded from the whole text. No network, no model: used offline and
//! in tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use themex_core::vector::l2_normalize;

use super::{EmbeddingProvider, ProviderKind};
use crate::errors::Result;

/// Offline, deterministic embedding provider.
#[derive(Clone, Debug)]
pub struct HashEmbeddingProvider {
    dims: usize,
    model: String,
}

impl HashEmbeddingProvider {
    /// Create a provider emitting `dims`-dimensional vectors.
    pub fn new(dims: usize) -> Self {
        Self::with_model(dims, &format!("hash-{dims}"))
    }

    /// Create a provider with an explicit model name.
    pub fn with_model(dims: usize, model: &str) -> Self {
        Self {
            dims: dims.max(1),
            model: model.to_string(),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let mut any = false;
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            for slot in 0..2 {
                let off = slot * 9;
                let mut idx_bytes = [0u8; 8];
                idx_bytes.copy_from_slice(&digest[off..off + 8]);
                let idx = (u64::from_le_bytes(idx_bytes) % self.dims as u64) as usize;
                let sign = if digest[off + 8] & 1 == 0 { 1.0 } else { -1.0 };
                v[idx] += sign;
            }
            any = true;
        }
        // Opposite-signed collisions can cancel out completely.
        if !any || v.iter().all(|x| *x == 0.0) {
            v = self.seeded(text);
        }
        l2_normalize(&mut v);
        v
    }

    fn seeded(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dims);
        let mut block = 0u32;
        while out.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            let digest = hasher.finalize();
            out.extend(
                digest
                    .iter()
                    .take(self.dims - out.len())
                    .map(|b| (f32::from(*b) / 127.5) - 1.0),
            );
            block += 1;
        }
        out
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &str {
        "hash"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dims)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use themex_core::vector::{cosine_similarity, l2_norm};

    #[tokio::test]
    async fn correct_dims_and_count() {
        let p = HashEmbeddingProvider::new(64);
        let out = p
            .embed_batch(&["a b c".into(), "hello world".into(), "!!".into()])
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v.len() == 64));
    }

    #[test]
    fn deterministic() {
        let p = HashEmbeddingProvider::new(128);
        assert_eq!(p.embed_text("remote work burnout"), p.embed_text("remote work burnout"));
    }

    #[test]
    fn unit_norm() {
        let p = HashEmbeddingProvider::new(48);
        for t in ["x", "", "some words here", "42"] {
            assert!((l2_norm(&p.embed_text(t)) - 1.0).abs() < 1e-4, "text {t:?}");
        }
    }

    #[test]
    fn shared_vocabulary_is_closer() {
        let p = HashEmbeddingProvider::new(256);
        let a = p.embed_text("teachers report burnout from remote classes");
        let b = p.embed_text("remote classes cause teachers burnout");
        let c = p.embed_text("quarterly revenue grew in emerging markets");
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn case_insensitive_tokens() {
        let p = HashEmbeddingProvider::new(32);
        assert_eq!(p.embed_text("Hello World"), p.embed_text("hello world"));
    }
}
