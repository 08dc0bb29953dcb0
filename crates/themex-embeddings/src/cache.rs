//! Bounded, expiring embedding cache.
//!
//! Keys are `SHA-256(model \0 text)`, so the same text embedded by two models
//! never collides. Entries past their TTL are never served; they are dropped
//! on lookup. Capacity overflow evicts the least recently used entry.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use themex_core::Embedding;
use tokio::time::Instant;

/// 32-byte cache key.
pub type CacheKey = [u8; 32];

/// Compute the cache key for `(model, text)`.
pub fn cache_key(model: &str, text: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

struct Entry {
    embedding: Embedding,
    expires_at: Instant,
}

/// Hit/miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from cache.
    pub hits: u64,
    /// Lookups that missed or found an expired entry.
    pub misses: u64,
    /// Live entries (expired ones may linger until touched).
    pub len: usize,
}

/// Thread-safe LRU of frozen embeddings.
pub struct EmbeddingCache {
    inner: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up an unexpired embedding. The returned value shares its buffer
    /// with the cached one.
    pub fn get(&self, model: &str, text: &str) -> Option<Embedding> {
        let key = cache_key(model, text);
        let found = {
            let mut guard = self.inner.lock();
            match guard.get(&key) {
                Some(entry) if entry.expires_at > Instant::now() => Some(entry.embedding.clone()),
                Some(_) => {
                    let _ = guard.pop(&key);
                    None
                }
                None => None,
            }
        };
        if found.is_some() {
            let _ = self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("themex_embedding_cache_hits_total").increment(1);
        } else {
            let _ = self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("themex_embedding_cache_misses_total").increment(1);
        }
        found
    }

    /// Store an embedding under `(model, text)`.
    pub fn insert(&self, model: &str, text: &str, embedding: Embedding) {
        let entry = Entry {
            embedding,
            expires_at: Instant::now() + self.ttl,
        };
        let _ = self.inner.lock().put(cache_key(model, text), entry);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Counters snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.inner.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(v: &[f32]) -> Embedding {
        Embedding::with_norm(v.to_vec(), "m").unwrap()
    }

    #[test]
    fn key_separates_models() {
        assert_ne!(cache_key("a", "text"), cache_key("b", "text"));
        assert_ne!(cache_key("ab", "c"), cache_key("a", "bc"));
        assert_eq!(cache_key("m", "t"), cache_key("m", "t"));
    }

    #[tokio::test(start_paused = true)]
    async fn hit_then_expiry() {
        let cache = EmbeddingCache::new(10, Duration::from_secs(60));
        let e = emb(&[1.0, 2.0]);
        cache.insert("m", "hello", e.clone());

        let got = cache.get("m", "hello").unwrap();
        assert!(got.shares_buffer_with(&e));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("m", "hello").is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.len), (1, 1, 0));
    }

    #[test]
    fn lru_eviction() {
        let cache = EmbeddingCache::new(2, Duration::from_secs(60));
        cache.insert("m", "a", emb(&[1.0]));
        cache.insert("m", "b", emb(&[2.0]));
        let _ = cache.get("m", "a");
        cache.insert("m", "c", emb(&[3.0]));
        assert!(cache.get("m", "a").is_some());
        assert!(cache.get("m", "b").is_none());
        assert!(cache.get("m", "c").is_some());
    }

    #[test]
    fn zero_capacity_still_works() {
        let cache = EmbeddingCache::new(0, Duration::from_secs(60));
        cache.insert("m", "a", emb(&[1.0]));
        assert!(cache.get("m", "a").is_some());
    }
}
