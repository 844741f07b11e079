//! Chooses model, output budget, and temperature for one LLM call based on
//! the prompt analysis and the model registry.

use std::sync::Arc;

use super::analyzer::{PromptAnalysis, TaskType};
use crate::llm::registry::{ModelFilter, ModelRegistry, ModelTier};

/// Safety margin over the estimated output size.
const OUTPUT_HEADROOM: f64 = 1.2;

const MIN_MAX_TOKENS: u32 = 512;

/// Fallback ceiling when the model is unknown to the registry.
const DEFAULT_CONTEXT_WINDOW: u32 = 8_192;

#[derive(Debug, Clone)]
pub struct AllocatedConfig {
    /// `None` leaves the choice to the provider's default model.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

pub struct LlmAllocator {
    registry: Arc<ModelRegistry>,
}

impl LlmAllocator {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Pick a config consistent with the analysis. The overall reading and
    /// heavy-complexity prompts are upgraded to the high tier; within a
    /// tier the cheapest model by output rate wins.
    pub fn allocate(&self, analysis: &PromptAnalysis, task_type: TaskType) -> AllocatedConfig {
        let tier = if analysis.requires_high_quality || task_type == TaskType::OverallReading {
            ModelTier::High
        } else {
            analysis
                .suitable_tiers
                .first()
                .copied()
                .unwrap_or(ModelTier::Balanced)
        };

        let candidates = self.registry.find(&ModelFilter::new().tier(tier));
        let model = candidates
            .iter()
            .min_by(|a, b| {
                a.cost_per_1m_output
                    .partial_cmp(&b.cost_per_1m_output)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|m| m.model_id.clone());

        let mut max_tokens =
            ((analysis.estimated_output_tokens as f64 * OUTPUT_HEADROOM) as u32).max(MIN_MAX_TOKENS);
        if let Some(model_id) = &model {
            if let Some(metadata) = self.registry.get(model_id) {
                // Never ask for more output than the window leaves after the
                // prompt.
                let ceiling = metadata
                    .max_context_window
                    .saturating_sub(analysis.estimated_input_tokens)
                    .max(MIN_MAX_TOKENS);
                max_tokens = max_tokens.min(ceiling);
            }
        }

        let temperature = match task_type {
            TaskType::CardInterpretation => 0.7,
            TaskType::OverallReading => 0.75,
            TaskType::Relationships => 0.7,
            TaskType::Advice => 0.65,
        };

        tracing::debug!(
            task = task_type.as_str(),
            tier = tier.as_str(),
            model = model.as_deref().unwrap_or("provider-default"),
            max_tokens,
            "allocated generation config"
        );

        AllocatedConfig {
            model,
            max_tokens,
            temperature,
        }
    }

    /// Ceiling for truncation retries: the model's context window minus the
    /// estimated input. This is the explicit per-model cap applied when a
    /// retry inflates `max_tokens`.
    pub fn truncation_cap(&self, model: Option<&str>, estimated_input_tokens: u32) -> u32 {
        let window = model
            .and_then(|m| self.registry.get(m))
            .map(|m| m.max_context_window)
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);
        window
            .saturating_sub(estimated_input_tokens)
            .max(MIN_MAX_TOKENS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::registry::{ModelMetadata, TaskLength};
    use crate::prompt::analyzer::PromptAnalyzer;

    fn registry() -> Arc<ModelRegistry> {
        let registry = ModelRegistry::new();
        registry.register(ModelMetadata {
            model_id: "fast-cheap".into(),
            provider: "mock".into(),
            display_name: "Fast Cheap".into(),
            cost_per_1m_input: 0.25,
            cost_per_1m_output: 1.25,
            max_context_window: 200_000,
            tier: ModelTier::Fast,
            suitable_for: vec![TaskLength::Short, TaskLength::Medium],
            available: true,
        });
        registry.register(ModelMetadata {
            model_id: "high-strong".into(),
            provider: "mock".into(),
            display_name: "High Strong".into(),
            cost_per_1m_input: 15.0,
            cost_per_1m_output: 75.0,
            max_context_window: 200_000,
            tier: ModelTier::High,
            suitable_for: vec![TaskLength::Long, TaskLength::Complex],
            available: true,
        });
        registry.register(ModelMetadata {
            model_id: "high-value".into(),
            provider: "mock".into(),
            display_name: "High Value".into(),
            cost_per_1m_input: 4.0,
            cost_per_1m_output: 20.0,
            max_context_window: 200_000,
            tier: ModelTier::High,
            suitable_for: vec![TaskLength::Long, TaskLength::Complex],
            available: true,
        });
        Arc::new(registry)
    }

    #[test]
    fn overall_reading_upgrades_to_high_tier() {
        let allocator = LlmAllocator::new(registry());
        let analysis =
            PromptAnalyzer::new().analyze("p", TaskType::OverallReading, 10, None, None, None, None);
        let config = allocator.allocate(&analysis, TaskType::OverallReading);
        // Cheapest high-tier model by output rate.
        assert_eq!(config.model.as_deref(), Some("high-value"));
        assert!((config.temperature - 0.75).abs() < 1e-6);
    }

    #[test]
    fn simple_task_picks_fast_tier() {
        let allocator = LlmAllocator::new(registry());
        let analysis =
            PromptAnalyzer::new().analyze("p", TaskType::Advice, 1, None, None, None, None);
        let config = allocator.allocate(&analysis, TaskType::Advice);
        assert_eq!(config.model.as_deref(), Some("fast-cheap"));
    }

    #[test]
    fn max_tokens_has_headroom_and_floor() {
        let allocator = LlmAllocator::new(registry());
        let analysis =
            PromptAnalyzer::new().analyze("p", TaskType::CardInterpretation, 3, None, None, None, None);
        let config = allocator.allocate(&analysis, TaskType::CardInterpretation);
        // 3 cards * 400 tokens * 1.2 headroom.
        assert_eq!(config.max_tokens, 1440);

        let tiny = PromptAnalyzer::new().analyze("p", TaskType::Advice, 0, None, None, None, None);
        let config = allocator.allocate(&tiny, TaskType::Advice);
        assert!(config.max_tokens >= MIN_MAX_TOKENS);
    }

    #[test]
    fn truncation_cap_subtracts_input_from_window() {
        let allocator = LlmAllocator::new(registry());
        assert_eq!(allocator.truncation_cap(Some("high-value"), 50_000), 150_000);
        // Unknown models fall back to the default window.
        assert_eq!(
            allocator.truncation_cap(Some("mystery"), 0),
            DEFAULT_CONTEXT_WINDOW
        );
        // Never below the floor even when the input exceeds the window.
        assert_eq!(
            allocator.truncation_cap(Some("high-value"), 500_000),
            MIN_MAX_TOKENS
        );
    }

    #[test]
    fn empty_registry_defers_to_provider_default() {
        let allocator = LlmAllocator::new(Arc::new(ModelRegistry::new()));
        let analysis =
            PromptAnalyzer::new().analyze("p", TaskType::Advice, 1, None, None, None, None);
        let config = allocator.allocate(&analysis, TaskType::Advice);
        assert!(config.model.is_none());
    }
}
