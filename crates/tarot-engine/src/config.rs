//! Administrative settings and orchestrator lifecycle. Credentials and
//! provider priority are loaded through a [`SettingsSource`] collaborator
//! when the orchestrator singleton is (re)built, never from process
//! environment per request. When an admin changes settings, the
//! collaborator invalidates the cell and the next request rebuilds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::llm::{
    AiError, AiProvider, AnthropicProvider, GeminiProvider, OpenAiProvider, Orchestrator,
};

/// Floor for the streaming path; multi-phase celtic readings need headroom
/// over the configured per-attempt timeout.
const STREAMING_TIMEOUT_FLOOR_SECS: u64 = 90;

const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub api_key: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub provider_priority: Vec<String>,
    pub providers: Vec<ProviderSettings>,
    pub default_timeout: u64,
    pub prompt_language: String,
    pub response_language: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            provider_priority: vec![
                "anthropic".to_string(),
                "openai".to_string(),
                "gemini".to_string(),
            ],
            providers: Vec::new(),
            default_timeout: 30,
            prompt_language: "en".to_string(),
            response_language: "ko".to_string(),
        }
    }
}

/// Where the settings live (admin database, config file, ...). Read-only
/// to the core.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<EngineSettings>;
}

/// Build provider adapters in priority order, skipping disabled entries and
/// entries without credentials.
pub fn build_providers(settings: &EngineSettings) -> Result<Vec<Arc<dyn AiProvider>>, AiError> {
    let mut providers: Vec<Arc<dyn AiProvider>> = Vec::new();

    for name in &settings.provider_priority {
        let Some(entry) = settings.providers.iter().find(|p| &p.name == name) else {
            tracing::debug!(provider = %name, "no settings entry for prioritized provider");
            continue;
        };
        if !entry.enabled {
            tracing::info!(provider = %name, "provider disabled, skipping");
            continue;
        }
        if entry.api_key.trim().is_empty() {
            tracing::warn!(provider = %name, "provider has no API key, skipping");
            continue;
        }

        let provider: Arc<dyn AiProvider> = match name.as_str() {
            "openai" => Arc::new(OpenAiProvider::new(&entry.api_key, entry.model.clone())?),
            "anthropic" => Arc::new(AnthropicProvider::new(&entry.api_key, entry.model.clone())?),
            "gemini" => Arc::new(GeminiProvider::new(&entry.api_key, entry.model.clone())?),
            other => {
                tracing::warn!(provider = other, "unknown provider name, skipping");
                continue;
            }
        };
        providers.push(provider);
    }

    if providers.is_empty() {
        return Err(AiError::InvalidRequest {
            provider: "orchestrator".into(),
            message: "no enabled providers configured".into(),
        });
    }
    Ok(providers)
}

/// Streaming requests cover multi-phase generation, so the per-attempt
/// deadline gets a buffer over the configured default.
pub fn streaming_timeout_secs(default_timeout: u64) -> u64 {
    STREAMING_TIMEOUT_FLOOR_SECS.max(default_timeout + 60)
}

/// Process-wide orchestrator slot. Built lazily from settings; an explicit
/// `invalidate()` discards it so the next request picks up changed
/// credentials and priority.
#[derive(Default)]
pub struct OrchestratorCell {
    slot: RwLock<Option<Arc<Orchestrator>>>,
}

impl OrchestratorCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_build(
        &self,
        source: &dyn SettingsSource,
        streaming: bool,
    ) -> anyhow::Result<Arc<Orchestrator>> {
        if let Some(existing) = self.slot.read().await.clone() {
            return Ok(existing);
        }

        let mut slot = self.slot.write().await;
        // Double-check: another task may have built it while we waited.
        if let Some(existing) = slot.clone() {
            return Ok(existing);
        }

        let settings = source.load().await?;
        let providers = build_providers(&settings)?;
        let timeout = if streaming {
            streaming_timeout_secs(settings.default_timeout)
        } else {
            settings.default_timeout
        };
        let orchestrator = Arc::new(Orchestrator::new(
            providers,
            Duration::from_secs(timeout),
            DEFAULT_MAX_RETRIES,
        )?);
        tracing::info!(timeout_secs = timeout, "orchestrator built from settings");
        *slot = Some(orchestrator.clone());
        Ok(orchestrator)
    }

    /// Install a pre-built orchestrator (boot-time warmup, tests).
    pub async fn set(&self, orchestrator: Arc<Orchestrator>) {
        *self.slot.write().await = Some(orchestrator);
    }

    /// Discard the cached orchestrator so the next request rebuilds it.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        if slot.take().is_some() {
            tracing::info!("orchestrator cache invalidated");
        } else {
            tracing::info!("orchestrator cache already empty");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(providers: Vec<ProviderSettings>) -> EngineSettings {
        EngineSettings {
            providers,
            ..Default::default()
        }
    }

    fn entry(name: &str, key: &str, enabled: bool) -> ProviderSettings {
        ProviderSettings {
            name: name.to_string(),
            api_key: key.to_string(),
            model: None,
            enabled,
            timeout: None,
        }
    }

    #[test]
    fn providers_follow_priority_order() {
        let settings = settings_with(vec![
            entry("openai", "sk-1", true),
            entry("anthropic", "sk-2", true),
        ]);
        let providers = build_providers(&settings).unwrap();
        // Default priority lists anthropic first.
        assert_eq!(providers[0].provider_name(), "anthropic");
        assert_eq!(providers[1].provider_name(), "openai");
    }

    #[test]
    fn disabled_and_keyless_providers_are_skipped() {
        let settings = settings_with(vec![
            entry("anthropic", "sk-2", false),
            entry("openai", "", true),
            entry("gemini", "AIza", true),
        ]);
        let providers = build_providers(&settings).unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].provider_name(), "gemini");
    }

    #[test]
    fn no_usable_providers_is_an_error() {
        let settings = settings_with(vec![entry("openai", "", true)]);
        assert!(matches!(
            build_providers(&settings).unwrap_err(),
            AiError::InvalidRequest { .. }
        ));
    }

    #[test]
    fn streaming_timeout_has_floor_and_buffer() {
        assert_eq!(streaming_timeout_secs(10), 90);
        assert_eq!(streaming_timeout_secs(30), 90);
        assert_eq!(streaming_timeout_secs(60), 120);
    }

    struct StaticSource(EngineSettings);

    #[async_trait]
    impl SettingsSource for StaticSource {
        async fn load(&self) -> anyhow::Result<EngineSettings> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn cell_caches_until_invalidated() {
        let source = StaticSource(settings_with(vec![entry("anthropic", "sk-2", true)]));
        let cell = OrchestratorCell::new();

        let first = cell.get_or_build(&source, false).await.unwrap();
        let second = cell.get_or_build(&source, false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        cell.invalidate().await;
        let third = cell.get_or_build(&source, false).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }
}
