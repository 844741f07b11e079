//! Multi-provider orchestration: model routing, per-attempt timeouts,
//! bounded retries with exponential backoff, and ordered fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::{AiError, AiProvider, AiResponse, GenerationConfig};

/// Hard ceiling on exponential backoff between attempts.
const BACKOFF_CAP_SECS: u64 = 4;

/// Successful orchestration outcome. `all_attempts` preserves the ordered
/// history across retries and fallbacks; `primary` is always its last entry.
#[derive(Debug, Clone)]
pub struct OrchestratorResponse {
    pub primary: AiResponse,
    pub all_attempts: Vec<AiResponse>,
    pub total_cost: f64,
}

/// One request in a `generate_parallel` batch.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub config: GenerationConfig,
    pub model: Option<String>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub total_providers: usize,
    pub primary_provider: ProviderStatus,
    pub fallback_providers: Vec<ProviderStatus>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

struct AttemptError {
    provider: String,
    kind: &'static str,
    is_primary: bool,
}

pub struct Orchestrator {
    providers: Vec<Arc<dyn AiProvider>>,
    provider_timeout: Duration,
    max_retries: u32,
}

impl Orchestrator {
    /// `providers[0]` is primary, the rest are fallbacks in priority order.
    pub fn new(
        providers: Vec<Arc<dyn AiProvider>>,
        provider_timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, AiError> {
        if providers.is_empty() {
            return Err(AiError::InvalidRequest {
                provider: "orchestrator".into(),
                message: "at least one provider must be specified".into(),
            });
        }
        tracing::info!(
            total = providers.len(),
            primary = providers[0].provider_name(),
            timeout_secs = provider_timeout.as_secs(),
            max_retries,
            "orchestrator initialized"
        );
        Ok(Self {
            providers,
            provider_timeout,
            max_retries,
        })
    }

    /// Generate with automatic fallback: compatible providers are tried
    /// strictly in priority order, each with its own retry budget.
    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
        model: Option<&str>,
    ) -> Result<OrchestratorResponse, AiError> {
        let start = Instant::now();
        let compatible = self.compatible_providers(model);

        if compatible.is_empty() {
            let available = self
                .providers
                .iter()
                .map(|p| p.provider_name().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let model = model.unwrap_or_default().to_string();
            tracing::error!(%model, %available, "no compatible provider");
            return Err(AiError::NoCompatibleProvider { model, available });
        }

        let mut errors: Vec<AttemptError> = Vec::new();
        let mut all_attempts: Vec<AiResponse> = Vec::new();

        for provider in &compatible {
            let is_primary = Arc::ptr_eq(provider, &self.providers[0]);
            let label = if is_primary { "primary" } else { "fallback" };
            tracing::info!(
                provider = provider.provider_name(),
                label,
                "attempting provider"
            );

            match self
                .try_provider(provider.as_ref(), prompt, system_prompt, config, model)
                .await
            {
                Ok(response) => {
                    all_attempts.push(response);
                    let total_cost = all_attempts.iter().map(|a| a.estimated_cost).sum();
                    tracing::info!(
                        provider = provider.provider_name(),
                        label,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "provider succeeded"
                    );
                    let primary = all_attempts.last().cloned().expect("attempt just pushed");
                    return Ok(OrchestratorResponse {
                        primary,
                        all_attempts,
                        total_cost,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.provider_name(),
                        label,
                        kind = e.kind(),
                        error = %e,
                        "provider failed"
                    );
                    errors.push(AttemptError {
                        provider: provider.provider_name().to_string(),
                        kind: e.kind(),
                        is_primary,
                    });
                }
            }
        }

        let summary = Self::format_error_summary(&errors);
        tracing::error!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            %summary,
            "all providers failed"
        );
        Err(AiError::AllProvidersFailed {
            count: compatible.len(),
            summary,
        })
    }

    /// Run several `generate` calls concurrently, output order matching the
    /// input order. Any single failure fails the whole batch; callers that
    /// want partial success must orchestrate themselves.
    pub async fn generate_parallel(
        &self,
        requests: Vec<GenerateRequest>,
    ) -> Result<Vec<OrchestratorResponse>, AiError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(count = requests.len(), "starting parallel generation");
        let start = Instant::now();

        let futures = requests.iter().map(|req| {
            self.generate(
                &req.prompt,
                req.system_prompt.as_deref(),
                &req.config,
                req.model.as_deref(),
            )
        });
        let results = futures::future::try_join_all(futures).await?;

        tracing::info!(
            count = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "parallel generation complete"
        );
        Ok(results)
    }

    pub fn provider_status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            total_providers: self.providers.len(),
            primary_provider: ProviderStatus {
                name: self.providers[0].provider_name().to_string(),
                model: self.providers[0].default_model().to_string(),
            },
            fallback_providers: self.providers[1..]
                .iter()
                .map(|p| ProviderStatus {
                    name: p.provider_name().to_string(),
                    model: p.default_model().to_string(),
                })
                .collect(),
            timeout_seconds: self.provider_timeout.as_secs(),
            max_retries: self.max_retries,
        }
    }

    /// Providers that serve `model`, in priority order. No model means every
    /// provider is compatible.
    fn compatible_providers(&self, model: Option<&str>) -> Vec<Arc<dyn AiProvider>> {
        match model {
            None => self.providers.clone(),
            Some(model) => self
                .providers
                .iter()
                .filter(|p| p.supports_model(model))
                .cloned()
                .collect(),
        }
    }

    /// One provider, `max_retries + 1` attempts. Retries are strictly
    /// sequential; transient errors back off `min(2^attempt, 4)` seconds
    /// unless the vendor supplied a `retry_after`.
    async fn try_provider(
        &self,
        provider: &dyn AiProvider,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
        model: Option<&str>,
    ) -> Result<AiResponse, AiError> {
        let attempts = self.max_retries + 1;
        for attempt in 0..attempts {
            let call = provider.generate(prompt, system_prompt, config, model);
            match tokio::time::timeout(self.provider_timeout, call).await {
                Err(_) => {
                    tracing::warn!(
                        provider = provider.provider_name(),
                        attempt = attempt + 1,
                        attempts,
                        timeout_secs = self.provider_timeout.as_secs(),
                        "provider attempt timed out"
                    );
                    if attempt + 1 < attempts {
                        tokio::time::sleep(Self::backoff(attempt)).await;
                    } else {
                        return Err(AiError::Timeout {
                            provider: provider.provider_name().to_string(),
                            message: format!("timed out after {attempts} attempts"),
                        });
                    }
                }
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) if e.is_retryable() => {
                    tracing::warn!(
                        provider = provider.provider_name(),
                        attempt = attempt + 1,
                        kind = e.kind(),
                        "transient provider error"
                    );
                    if attempt + 1 < attempts {
                        let wait = e.retry_after().unwrap_or_else(|| Self::backoff(attempt));
                        tokio::time::sleep(wait).await;
                    } else {
                        return Err(e);
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        provider = provider.provider_name(),
                        kind = e.kind(),
                        "non-retryable provider error"
                    );
                    return Err(e);
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_secs((1u64 << attempt.min(63)).min(BACKOFF_CAP_SECS))
    }

    fn format_error_summary(errors: &[AttemptError]) -> String {
        if errors.is_empty() {
            return "No errors recorded".to_string();
        }
        errors
            .iter()
            .map(|e| {
                let role = if e.is_primary { "Primary" } else { "Fallback" };
                format!("{role}({}): {}", e.provider, e.kind)
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
