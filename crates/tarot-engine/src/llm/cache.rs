//! Response cache keyed by a SHA-256 fingerprint of the deterministic
//! request parameters. The shared backend is Redis; an in-memory backend
//! covers single-instance deployments and tests.
//!
//! Cache failures never propagate: a broken connection at boot degrades the
//! whole object to a no-cache pass-through, and every runtime error counts
//! as a miss.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use redis::AsyncCommands;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{AiResponse, GenerationConfig};

/// Request fields that never enter the cache key: they do not change what
/// the model produces.
pub const EXCLUDED_PARAMS: &[&str] = &["timeout", "max_retries", "latency_ms", "created_at"];

const DEFAULT_TTL_SECS: u64 = 86_400; // 24 hours
const DEFAULT_KEY_PREFIX: &str = "ai_cache:";

/// The key-forming subset of one generation request.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyParams<'a> {
    pub prompt: &'a str,
    pub system_prompt: Option<&'a str>,
    pub model: Option<&'a str>,
    pub config: Option<&'a GenerationConfig>,
}

impl<'a> CacheKeyParams<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            prompt,
            system_prompt: None,
            model: None,
            config: None,
        }
    }

    pub fn model(mut self, model: &'a str) -> Self {
        self.model = Some(model);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    pub redis_url: String,
    pub default_ttl_secs: u64,
    pub key_prefix: String,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

#[derive(Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

impl CacheMetrics {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            total_requests: total,
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct MemoryEntry {
    payload: String,
    stored_at: Instant,
    ttl: Duration,
}

enum CacheBackend {
    /// Connection failed at boot; every operation is a quiet no-op.
    Disabled,
    Memory(Mutex<HashMap<String, MemoryEntry>>),
    Redis(redis::aio::ConnectionManager),
}

pub struct ResponseCache {
    backend: CacheBackend,
    default_ttl_secs: u64,
    key_prefix: String,
    metrics: CacheMetrics,
}

impl ResponseCache {
    /// Connect to the shared Redis backend. A failed connection yields a
    /// usable no-cache object rather than an error.
    pub async fn connect(config: ResponseCacheConfig) -> Self {
        let backend = match redis::Client::open(config.redis_url.as_str()) {
            Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                Ok(manager) => {
                    tracing::info!(url = %config.redis_url, "response cache connected");
                    CacheBackend::Redis(manager)
                }
                Err(e) => {
                    tracing::error!(url = %config.redis_url, error = %e, "response cache unavailable, running without caching");
                    CacheBackend::Disabled
                }
            },
            Err(e) => {
                tracing::error!(url = %config.redis_url, error = %e, "invalid redis URL, running without caching");
                CacheBackend::Disabled
            }
        };
        Self {
            backend,
            default_ttl_secs: config.default_ttl_secs,
            key_prefix: config.key_prefix,
            metrics: CacheMetrics::default(),
        }
    }

    /// Process-local cache for single-instance deployments and tests.
    pub fn in_memory() -> Self {
        Self {
            backend: CacheBackend::Memory(Mutex::new(HashMap::new())),
            default_ttl_secs: DEFAULT_TTL_SECS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            metrics: CacheMetrics::default(),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            backend: CacheBackend::Disabled,
            default_ttl_secs: DEFAULT_TTL_SECS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, CacheBackend::Disabled)
    }

    /// Deterministic fingerprint: sorted-key canonical JSON of the included
    /// fields, hashed with SHA-256, under a configurable prefix. Fields in
    /// [`EXCLUDED_PARAMS`] never participate.
    pub fn cache_key(&self, params: &CacheKeyParams<'_>) -> String {
        let mut fields: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        fields.insert("prompt", json!(params.prompt));
        if let Some(system) = params.system_prompt {
            fields.insert("system_prompt", json!(system));
        }
        if let Some(model) = params.model {
            fields.insert("model", json!(model));
        }
        if let Some(config) = params.config {
            fields.insert("max_tokens", json!(config.max_tokens));
            fields.insert("temperature", json!(config.temperature));
            fields.insert("top_p", json!(config.top_p));
            fields.insert("frequency_penalty", json!(config.frequency_penalty));
            fields.insert("presence_penalty", json!(config.presence_penalty));
            if !config.stop_sequences.is_empty() {
                fields.insert("stop_sequences", json!(config.stop_sequences));
            }
        }

        let canonical = serde_json::to_string(&fields).expect("key fields are serializable");
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{}{:x}", self.key_prefix, hasher.finalize())
    }

    fn short_key<'k>(&self, key: &'k str) -> &'k str {
        &key[..(self.key_prefix.len() + 16).min(key.len())]
    }

    pub async fn get(&self, params: &CacheKeyParams<'_>) -> Option<AiResponse> {
        let key = self.cache_key(params);
        let payload = match &self.backend {
            CacheBackend::Disabled => return None,
            CacheBackend::Memory(map) => {
                let mut map = map.lock();
                match map.get(&key) {
                    Some(entry) if entry.stored_at.elapsed() < entry.ttl => {
                        Some(entry.payload.clone())
                    }
                    Some(_) => {
                        map.remove(&key);
                        None
                    }
                    None => None,
                }
            }
            CacheBackend::Redis(manager) => {
                let mut conn = manager.clone();
                let fetched: Result<Option<String>, redis::RedisError> = conn.get(&key).await;
                match fetched {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.metrics.record_error();
                        tracing::error!(error = %e, "cache read failed, treating as miss");
                        return None;
                    }
                }
            }
        };

        match payload {
            Some(data) => match serde_json::from_str::<AiResponse>(&data) {
                Ok(response) => {
                    self.metrics.record_hit();
                    tracing::info!(
                        key = self.short_key(&key),
                        provider = %response.provider,
                        model = %response.model,
                        "cache hit"
                    );
                    Some(response)
                }
                Err(e) => {
                    self.metrics.record_error();
                    tracing::error!(error = %e, "failed to deserialize cached response");
                    None
                }
            },
            None => {
                self.metrics.record_miss();
                tracing::debug!(key = self.short_key(&key), "cache miss");
                None
            }
        }
    }

    pub async fn set(
        &self,
        response: &AiResponse,
        params: &CacheKeyParams<'_>,
        ttl_secs: Option<u64>,
    ) -> bool {
        let key = self.cache_key(params);
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);

        let payload = match serde_json::to_string(response) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_error();
                tracing::error!(error = %e, "failed to serialize response for caching");
                return false;
            }
        };

        let stored = match &self.backend {
            CacheBackend::Disabled => return false,
            CacheBackend::Memory(map) => {
                map.lock().insert(
                    key.clone(),
                    MemoryEntry {
                        payload,
                        stored_at: Instant::now(),
                        ttl: Duration::from_secs(ttl),
                    },
                );
                true
            }
            CacheBackend::Redis(manager) => {
                let mut conn = manager.clone();
                let result: Result<(), redis::RedisError> = conn.set_ex(&key, payload, ttl).await;
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        self.metrics.record_error();
                        tracing::error!(error = %e, "cache write failed");
                        false
                    }
                }
            }
        };

        if stored {
            tracing::info!(
                key = self.short_key(&key),
                ttl,
                provider = %response.provider,
                "cached response"
            );
        }
        stored
    }

    pub async fn invalidate(&self, params: &CacheKeyParams<'_>) -> bool {
        let key = self.cache_key(params);
        match &self.backend {
            CacheBackend::Disabled => false,
            CacheBackend::Memory(map) => map.lock().remove(&key).is_some(),
            CacheBackend::Redis(manager) => {
                let mut conn = manager.clone();
                let deleted: Result<i64, redis::RedisError> = conn.del(&key).await;
                match deleted {
                    Ok(n) => n > 0,
                    Err(e) => {
                        tracing::error!(error = %e, "cache invalidation failed");
                        false
                    }
                }
            }
        }
    }

    /// Delete every key under the configured prefix. Returns the count.
    pub async fn clear_all(&self) -> u64 {
        match &self.backend {
            CacheBackend::Disabled => 0,
            CacheBackend::Memory(map) => {
                let mut map = map.lock();
                let count = map.len() as u64;
                map.clear();
                tracing::info!(deleted = count, "cleared cached responses");
                count
            }
            CacheBackend::Redis(manager) => {
                let mut conn = manager.clone();
                let pattern = format!("{}*", self.key_prefix);
                let mut deleted = 0u64;
                let mut cursor: u64 = 0;
                loop {
                    let scanned: Result<(u64, Vec<String>), redis::RedisError> =
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(100)
                            .query_async(&mut conn)
                            .await;
                    let (next, keys) = match scanned {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::error!(error = %e, "cache scan failed");
                            break;
                        }
                    };
                    if !keys.is_empty() {
                        let removed: Result<u64, redis::RedisError> = conn.del(&keys).await;
                        deleted += removed.unwrap_or(0);
                    }
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                tracing::info!(deleted, "cleared cached responses");
                deleted
            }
        }
    }

    pub async fn health(&self) -> CacheHealth {
        match &self.backend {
            CacheBackend::Disabled => CacheHealth {
                status: "unhealthy",
                response_time_ms: None,
                error: Some("cache client not initialized".into()),
            },
            CacheBackend::Memory(_) => CacheHealth {
                status: "healthy",
                response_time_ms: Some(0.0),
                error: None,
            },
            CacheBackend::Redis(manager) => {
                let mut conn = manager.clone();
                let start = Instant::now();
                let pong: Result<String, redis::RedisError> =
                    redis::cmd("PING").query_async(&mut conn).await;
                match pong {
                    Ok(_) => CacheHealth {
                        status: "healthy",
                        response_time_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
                        error: None,
                    },
                    Err(e) => CacheHealth {
                        status: "unhealthy",
                        response_time_ms: None,
                        error: Some(e.to_string()),
                    },
                }
            }
        }
    }

    pub fn metrics(&self) -> CacheStats {
        self.metrics.stats()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::llm::FinishReason;

    fn key_of(cache: &ResponseCache, params: CacheKeyParams<'_>) -> String {
        cache.cache_key(&params)
    }

    fn response(content: &str) -> AiResponse {
        AiResponse {
            content: content.into(),
            model: "m".into(),
            provider: "anthropic".into(),
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
            estimated_cost: 0.001,
            finish_reason: Some(FinishReason::Stop),
            latency_ms: 10,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn key_is_deterministic() {
        let cache = ResponseCache::disabled();
        let config = GenerationConfig::default();
        let params = CacheKeyParams {
            prompt: "T",
            system_prompt: Some("S"),
            model: Some("m"),
            config: Some(&config),
        };
        assert_eq!(key_of(&cache, params), key_of(&cache, params));
        // Prefix + 64 hex chars of SHA-256.
        assert_eq!(key_of(&cache, params).len(), DEFAULT_KEY_PREFIX.len() + 64);
    }

    #[test]
    fn key_varies_by_prompt_model_and_system() {
        let cache = ResponseCache::disabled();
        let base = key_of(&cache, CacheKeyParams::new("T"));
        let other_prompt = key_of(&cache, CacheKeyParams::new("U"));
        let with_model = key_of(&cache, CacheKeyParams::new("T").model("m"));
        let with_system = key_of(
            &cache,
            CacheKeyParams {
                system_prompt: Some("s"),
                ..CacheKeyParams::new("T")
            },
        );
        assert_ne!(base, other_prompt);
        assert_ne!(base, with_model);
        assert_ne!(base, with_system);
        assert_ne!(with_model, with_system);
    }

    #[test]
    fn key_ignores_non_deterministic_fields() {
        // latency_ms / created_at / timeout / max_retries are not part of
        // CacheKeyParams at all; the excluded list documents that contract.
        assert!(EXCLUDED_PARAMS.contains(&"latency_ms"));
        assert!(EXCLUDED_PARAMS.contains(&"created_at"));
        assert!(EXCLUDED_PARAMS.contains(&"timeout"));
        assert!(EXCLUDED_PARAMS.contains(&"max_retries"));
    }

    #[test]
    fn key_varies_by_generation_params() {
        let cache = ResponseCache::disabled();
        let low = GenerationConfig {
            temperature: 0.2,
            ..Default::default()
        };
        let high = GenerationConfig {
            temperature: 1.2,
            ..Default::default()
        };
        let a = key_of(
            &cache,
            CacheKeyParams {
                config: Some(&low),
                ..CacheKeyParams::new("T")
            },
        );
        let b = key_of(
            &cache,
            CacheKeyParams {
                config: Some(&high),
                ..CacheKeyParams::new("T")
            },
        );
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn memory_backend_round_trips() {
        let cache = ResponseCache::in_memory();
        let params = CacheKeyParams::new("T").model("m");

        assert!(cache.get(&params).await.is_none());
        assert!(cache.set(&response("cached"), &params, None).await);
        let hit = cache.get(&params).await.unwrap();
        assert_eq!(hit.content, "cached");

        let stats = cache.metrics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        assert!(cache.invalidate(&params).await);
        assert!(cache.get(&params).await.is_none());
    }

    #[tokio::test]
    async fn memory_backend_respects_ttl() {
        let cache = ResponseCache::in_memory();
        let params = CacheKeyParams::new("T");
        cache.set(&response("short lived"), &params, Some(0)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get(&params).await.is_none());
    }

    #[tokio::test]
    async fn clear_all_reports_count() {
        let cache = ResponseCache::in_memory();
        cache
            .set(&response("a"), &CacheKeyParams::new("A"), None)
            .await;
        cache
            .set(&response("b"), &CacheKeyParams::new("B"), None)
            .await;
        assert_eq!(cache.clear_all().await, 2);
        assert!(cache.get(&CacheKeyParams::new("A")).await.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_degrades_quietly() {
        let cache = ResponseCache::disabled();
        assert!(!cache.is_enabled());
        assert!(cache.get(&CacheKeyParams::new("T")).await.is_none());
        assert!(!cache.set(&response("x"), &CacheKeyParams::new("T"), None).await);
        assert_eq!(cache.clear_all().await, 0);
        let health = cache.health().await;
        assert_eq!(health.status, "unhealthy");
    }

    #[test]
    fn empty_metrics_have_zero_hit_rate() {
        let metrics = CacheMetrics::default();
        assert_eq!(metrics.stats().hit_rate, 0.0);
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        let stats = metrics.stats();
        assert_eq!(stats.total_requests, 3);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }
}
