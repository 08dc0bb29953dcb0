//! Similarity-keyed result cache.
//!
//! Each namespace holds a flat list of `(query vector, payload, expiry)`.
//! Lookups brute-force the namespace for the most similar live entry and
//! return its payload when the cosine similarity reaches the threshold.

use std::collections::HashMap;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use themex_core::vector::{cosine_similarity, l2_normalize};
use themex_settings::CacheSettings;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default match threshold.
pub const DEFAULT_THRESHOLD: f32 = 0.98;
/// Default time to live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);
/// Default capacity across all namespaces.
pub const DEFAULT_CAPACITY: usize = 1_000;

struct Entry<V> {
    vector: Vec<f32>,
    payload: V,
    inserted: Instant,
    expires: Instant,
}

/// A cache hit.
#[derive(Clone, Debug, PartialEq)]
pub struct SemanticHit<V> {
    /// Stored payload.
    pub payload: V,
    /// Cosine similarity to the query.
    pub similarity: f32,
}

/// Counters since creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SemanticCacheStats {
    /// Live and expired entries currently held.
    pub entries: usize,
    /// Successful lookups.
    pub hits: u64,
    /// Failed lookups.
    pub misses: u64,
}

struct Inner<V> {
    namespaces: HashMap<String, Vec<Entry<V>>>,
    len: usize,
    hits: u64,
    misses: u64,
}

/// Bounded semantic cache.
pub struct SemanticCache<V> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
    ttl: Duration,
    threshold: f32,
}

impl<V> std::fmt::Debug for SemanticCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl<V: Clone> Default for SemanticCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL, DEFAULT_THRESHOLD)
    }
}

impl<V: Clone> SemanticCache<V> {
    /// Create a cache. Capacity is at least one.
    pub fn new(capacity: usize, ttl: Duration, threshold: f32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                namespaces: HashMap::new(),
                len: 0,
                hits: 0,
                misses: 0,
            }),
            capacity: capacity.max(1),
            ttl,
            threshold,
        }
    }

    /// Create from settings.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(
            settings.semantic_capacity,
            Duration::from_secs(settings.semantic_ttl_secs),
            settings.semantic_threshold,
        )
    }

    /// Nearest live entry in `namespace` at or above the threshold.
    pub fn get(&self, namespace: &str, query: &[f32]) -> Option<SemanticHit<V>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let best = inner.namespaces.get(namespace).and_then(|entries| {
            entries
                .iter()
                .filter(|e| e.expires > now && e.vector.len() == query.len())
                .map(|e| (e, cosine_similarity(&e.vector, query)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .filter(|(_, sim)| *sim >= self.threshold)
                .map(|(e, similarity)| SemanticHit {
                    payload: e.payload.clone(),
                    similarity,
                })
        });
        if best.is_some() {
            inner.hits += 1;
            counter!("themex_semantic_cache_hits_total", "namespace" => namespace.to_string()).increment(1);
        } else {
            inner.misses += 1;
            counter!("themex_semantic_cache_misses_total", "namespace" => namespace.to_string()).increment(1);
        }
        trace!(namespace, hit = best.is_some(), "semantic cache lookup");
        best
    }

    /// Store `payload` under `query`. A zero vector is not cached.
    pub fn set(&self, namespace: &str, query: &[f32], payload: V) {
        let mut vector = query.to_vec();
        l2_normalize(&mut vector);
        if vector.iter().all(|x| *x == 0.0) {
            debug!(namespace, "refusing to cache zero query vector");
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if inner.len >= self.capacity {
            Self::evict(&mut inner, now, self.capacity);
        }
        inner.namespaces.entry(namespace.to_string()).or_default().push(Entry {
            vector,
            payload,
            inserted: now,
            expires: now + self.ttl,
        });
        inner.len += 1;
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.namespaces.clear();
        inner.len = 0;
    }

    /// Current counters.
    pub fn stats(&self) -> SemanticCacheStats {
        let inner = self.inner.lock();
        SemanticCacheStats {
            entries: inner.len,
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Make room for one entry: expired entries first, then the oldest.
    fn evict(inner: &mut Inner<V>, now: Instant, capacity: usize) {
        let mut removed = 0;
        for entries in inner.namespaces.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.expires > now);
            removed += before - entries.len();
        }
        inner.len -= removed;

        while inner.len >= capacity {
            let oldest = inner
                .namespaces
                .iter()
                .flat_map(|(ns, entries)| entries.iter().enumerate().map(move |(i, e)| (ns, i, e.inserted)))
                .min_by_key(|(_, _, inserted)| *inserted)
                .map(|(ns, i, _)| (ns.clone(), i));
            let Some((ns, i)) = oldest else { break };
            if let Some(entries) = inner.namespaces.get_mut(&ns) {
                let _ = entries.remove(i);
            }
            inner.len -= 1;
            removed += 1;
        }
        inner.namespaces.retain(|_, entries| !entries.is_empty());
        debug!(removed, "semantic cache evicted entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> SemanticCache<String> {
        SemanticCache::new(capacity, Duration::from_secs(60), 0.98)
    }

    #[tokio::test(start_paused = true)]
    async fn hit_before_ttl_miss_after() {
        let c = cache(10);
        c.set("survey", &[1.0, 0.0, 0.0], "result".into());
        let hit = c.get("survey", &[0.999, 0.01, 0.0]).unwrap();
        assert_eq!(hit.payload, "result");
        assert!(hit.similarity > 0.98);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(c.get("survey", &[1.0, 0.0, 0.0]).is_none());
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn below_threshold_misses() {
        let c = cache(10);
        c.set("survey", &[1.0, 0.0], "a".into());
        assert!(c.get("survey", &[0.9, 0.44]).is_none());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let c = cache(10);
        c.set("survey", &[1.0, 0.0], "a".into());
        assert!(c.get("grounded", &[1.0, 0.0]).is_none());
    }

    #[tokio::test]
    async fn nearest_entry_wins() {
        let c = cache(10);
        c.set("x", &[1.0, 0.0], "far".into());
        c.set("x", &[1.0, 0.1], "near".into());
        assert_eq!(c.get("x", &[1.0, 0.1]).unwrap().payload, "near");
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_prefers_expired_then_oldest() {
        let c = SemanticCache::new(2, Duration::from_secs(10), 0.98);
        c.set("x", &[1.0, 0.0, 0.0], "old".to_string());
        tokio::time::advance(Duration::from_secs(11)).await;
        c.set("x", &[0.0, 1.0, 0.0], "mid".to_string());
        // "old" is expired and goes first.
        c.set("x", &[0.0, 0.0, 1.0], "new".to_string());
        assert_eq!(c.stats().entries, 2);
        assert!(c.get("x", &[0.0, 1.0, 0.0]).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        c.set("y", &[1.0, 1.0, 0.0], "newest".to_string());
        assert_eq!(c.stats().entries, 2);
        assert!(c.get("x", &[0.0, 1.0, 0.0]).is_none());
        assert!(c.get("x", &[0.0, 0.0, 1.0]).is_some());
    }

    #[tokio::test]
    async fn zero_query_is_not_stored() {
        let c = cache(10);
        c.set("x", &[0.0, 0.0], "nothing".into());
        assert_eq!(c.stats().entries, 0);
    }
}
