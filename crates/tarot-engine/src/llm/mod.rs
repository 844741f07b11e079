//! LLM provider abstraction and orchestration.
//!
//! One [`AiProvider`] wraps one vendor API; the [`Orchestrator`] multiplexes
//! several of them with model routing, per-attempt timeouts, bounded retries,
//! and ordered fallback. [`CachedOrchestrator`] composes a response cache on
//! top.

pub mod anthropic;
pub mod cache;
pub mod cached;
pub mod error;
pub mod gemini;
pub mod openai;
pub mod orchestrator;
pub mod registry;

pub use anthropic::AnthropicProvider;
pub use cache::{ResponseCache, ResponseCacheConfig};
pub use cached::CachedOrchestrator;
pub use error::AiError;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use orchestrator::{GenerateRequest, Orchestrator, OrchestratorResponse};
pub use registry::{ModelMetadata, ModelRegistry, ModelTier};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why the model stopped emitting tokens, normalized across vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Other,
}

impl FinishReason {
    /// The output budget ran out before natural completion.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::MaxTokens)
    }
}

/// Sampling parameters for one generation call. Validated on construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop_sequences: Vec::new(),
        }
    }
}

impl GenerationConfig {
    pub fn new(max_tokens: u32, temperature: f32) -> Result<Self, AiError> {
        let config = Self {
            max_tokens,
            temperature,
            ..Default::default()
        };
        config.validate("config")?;
        Ok(config)
    }

    pub fn validate(&self, provider: &str) -> Result<(), AiError> {
        if self.max_tokens == 0 {
            return Err(AiError::InvalidRequest {
                provider: provider.to_string(),
                message: "max_tokens must be positive".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AiError::InvalidRequest {
                provider: provider.to_string(),
                message: "temperature must be between 0 and 2".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(AiError::InvalidRequest {
                provider: provider.to_string(),
                message: "top_p must be between 0 and 1".into(),
            });
        }
        Ok(())
    }
}

/// Outcome of a single provider call. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub finish_reason: Option<FinishReason>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Uniform interface over one LLM vendor.
#[async_trait]
pub trait AiProvider: Send + Sync + std::fmt::Debug {
    /// Stable identifier, e.g. `openai`, `anthropic`, `gemini`.
    fn provider_name(&self) -> &str;

    fn default_model(&self) -> &str;

    fn available_models(&self) -> &[&'static str];

    fn supports_model(&self, model: &str) -> bool {
        self.available_models().contains(&model)
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
        model: Option<&str>,
    ) -> Result<AiResponse, AiError>;

    /// Cost in USD for the given token counts; rates are per 1M tokens.
    fn estimate_cost(&self, prompt_tokens: u32, completion_tokens: u32, model: Option<&str>)
        -> f64;

    /// Best-effort client-side count. Vendors without a public tokenizer use
    /// the ~4 chars/token approximation.
    fn count_tokens(&self, text: &str, _model: Option<&str>) -> u32 {
        (text.len() / 4).max(1) as u32
    }

    fn context_window(&self, model: Option<&str>) -> u32;

    /// Per-1M-token (input, output) pricing rows used by the registry sync.
    fn pricing_table(&self) -> &[(&'static str, f64, f64)];
}

/// Longest-prefix lookup over a pricing or context-window table, so that
/// `gpt-4-turbo-preview` matches its own row rather than `gpt-4`.
pub(crate) fn longest_prefix_match<'a, T>(
    model: &str,
    table: &'a [(&'static str, T)],
) -> Option<&'a T> {
    table
        .iter()
        .filter(|(key, _)| model.starts_with(key))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, value)| value)
}
