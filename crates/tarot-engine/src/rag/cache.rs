//! In-memory LRU cache for retrieval results, so repeated questions do not
//! hit the vector store again. Entries expire after a TTL; eviction is
//! least-recently-used on capacity.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::retriever::{CardContext, SpreadContext};
use super::vector_store::RetrievalResult;

const DEFAULT_MAX_SIZE: usize = 1000;
const DEFAULT_TTL_SECS: u64 = 3600;

/// Queries longer than this only contribute their prefix to the cache key.
const KEY_QUERY_PREFIX: usize = 100;

/// The retrieval families that are worth caching. Combination and category
/// lookups are cheap KB reads and stay uncached.
#[derive(Debug, Clone)]
pub enum CachedContext {
    Card(CardContext),
    Spread(SpreadContext),
    General(RetrievalResult),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RagCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
    pub ttl_seconds: u64,
}

struct Inner {
    entries: lru::LruCache<String, (CachedContext, Instant)>,
    hits: u64,
    misses: u64,
}

pub struct RagCache {
    inner: Mutex<Inner>,
    max_size: usize,
    ttl: Duration,
}

impl Default for RagCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl RagCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        tracing::info!(max_size, ttl_secs = ttl.as_secs(), "RAG cache initialized");
        Self {
            inner: Mutex::new(Inner {
                entries: lru::LruCache::new(
                    NonZeroUsize::new(max_size.max(1)).expect("nonzero capacity"),
                ),
                hits: 0,
                misses: 0,
            }),
            max_size,
            ttl,
        }
    }

    /// Deterministic key over method name + truncated query + scalar
    /// parameters. Truncation only affects the key, not the query itself.
    pub fn key(method: &str, query: &str, k: usize, scalars: &[&str]) -> String {
        let truncated: String = query.chars().take(KEY_QUERY_PREFIX).collect();
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"|");
        hasher.update(truncated.as_bytes());
        hasher.update(b"|");
        hasher.update(k.to_le_bytes());
        for scalar in scalars {
            hasher.update(b"|");
            hasher.update(scalar.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<CachedContext> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some((_, stored_at)) if stored_at.elapsed() > self.ttl => {
                inner.entries.pop(key);
                inner.misses += 1;
                tracing::debug!(key = &key[..8], "RAG cache entry expired");
                None
            }
            Some((value, _)) => {
                let value = value.clone();
                inner.hits += 1;
                tracing::debug!(key = &key[..8], "RAG cache hit");
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn set(&self, key: String, value: CachedContext) {
        let mut inner = self.inner.lock();
        inner.entries.put(key, (value, Instant::now()));
    }

    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        tracing::info!(count, "RAG cache cleared");
        count
    }

    pub fn stats(&self) -> RagCacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        RagCacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            total_requests: total,
            hit_rate: if total == 0 {
                0.0
            } else {
                inner.hits as f64 / total as f64
            },
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn general(docs: &[&str]) -> CachedContext {
        CachedContext::General(RetrievalResult {
            documents: docs.iter().map(|s| s.to_string()).collect(),
            metadatas: vec![],
            distances: vec![],
            ids: vec![],
        })
    }

    #[test]
    fn hit_after_set() {
        let cache = RagCache::default();
        let key = RagCache::key("general", "what should I focus on", 3, &[]);
        assert!(cache.get(&key).is_none());
        cache.set(key.clone(), general(&["insight"]));
        match cache.get(&key).unwrap() {
            CachedContext::General(r) => assert_eq!(r.documents, vec!["insight"]),
            _ => panic!("wrong family"),
        }
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn long_queries_share_a_key_prefix() {
        let long_a = format!("{}{}", "x".repeat(150), "tail-a");
        let long_b = format!("{}{}", "x".repeat(150), "tail-b");
        // Identical first 100 chars means identical keys.
        assert_eq!(
            RagCache::key("general", &long_a, 3, &[]),
            RagCache::key("general", &long_b, 3, &[])
        );
        // Different k still separates them.
        assert_ne!(
            RagCache::key("general", &long_a, 3, &[]),
            RagCache::key("general", &long_a, 5, &[])
        );
    }

    #[test]
    fn ttl_expiry_counts_as_miss() {
        let cache = RagCache::new(10, Duration::from_millis(0));
        let key = RagCache::key("general", "q", 3, &[]);
        cache.set(key.clone(), general(&["doc"]));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = RagCache::new(2, Duration::from_secs(60));
        cache.set("a".into(), general(&["1"]));
        cache.set("b".into(), general(&["2"]));
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a");
        cache.set("c".into(), general(&["3"]));
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn clear_reports_count() {
        let cache = RagCache::default();
        cache.set("a".into(), general(&["1"]));
        cache.set("b".into(), general(&["2"]));
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.stats().size, 0);
    }
}
