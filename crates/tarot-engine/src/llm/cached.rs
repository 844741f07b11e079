//! Cache decorator over the orchestrator. Composition rather than
//! inheritance: the decorator checks the response cache before delegating
//! and writes through after a successful generation.

use std::sync::Arc;

use super::cache::{CacheKeyParams, CacheStats, ResponseCache};
use super::{AiError, GenerationConfig, Orchestrator, OrchestratorResponse};

pub struct CachedOrchestrator {
    inner: Arc<Orchestrator>,
    cache: Arc<ResponseCache>,
    enable_caching: bool,
}

impl CachedOrchestrator {
    pub fn new(inner: Arc<Orchestrator>, cache: Arc<ResponseCache>, enable_caching: bool) -> Self {
        tracing::info!(enable_caching, "cached orchestrator initialized");
        Self {
            inner,
            cache,
            enable_caching,
        }
    }

    pub fn inner(&self) -> &Orchestrator {
        &self.inner
    }

    /// Generate with a cache layer. Both the per-call `use_cache` flag and
    /// the instance-level `enable_caching` must be set for the cache to
    /// participate. On a hit, no provider is invoked and `total_cost` is
    /// zero, since nothing was spent on this call.
    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
        model: Option<&str>,
        use_cache: bool,
    ) -> Result<OrchestratorResponse, AiError> {
        let use_cache = use_cache && self.enable_caching;
        let params = CacheKeyParams {
            prompt,
            system_prompt,
            model,
            config: Some(config),
        };

        if use_cache {
            if let Some(cached) = self.cache.get(&params).await {
                tracing::info!(provider = %cached.provider, "returning cached response");
                return Ok(OrchestratorResponse {
                    primary: cached.clone(),
                    all_attempts: vec![cached],
                    total_cost: 0.0,
                });
            }
            tracing::debug!("cache miss, generating new response");
        }

        let response = self
            .inner
            .generate(prompt, system_prompt, config, model)
            .await?;

        if use_cache {
            self.cache.set(&response.primary, &params, None).await;
        }

        Ok(response)
    }

    pub fn cache_metrics(&self) -> CacheStats {
        self.cache.metrics()
    }

    pub fn reset_cache_metrics(&self) {
        self.cache.reset_metrics();
    }

    pub async fn invalidate_cache(&self, params: &CacheKeyParams<'_>) -> bool {
        self.cache.invalidate(params).await
    }

    pub async fn clear_all_cache(&self) -> u64 {
        self.cache.clear_all().await
    }

    pub async fn cache_health(&self) -> super::cache::CacheHealth {
        self.cache.health().await
    }
}
