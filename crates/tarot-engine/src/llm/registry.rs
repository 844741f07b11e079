//! Process-wide model registry. Populated once at boot from the configured
//! adapters, append-only afterwards.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{longest_prefix_match, AiProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Balanced,
    High,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLength {
    Short,
    Medium,
    Long,
    Complex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub provider: String,
    pub display_name: String,
    pub cost_per_1m_input: f64,
    pub cost_per_1m_output: f64,
    pub max_context_window: u32,
    pub tier: ModelTier,
    pub suitable_for: Vec<TaskLength>,
    pub available: bool,
}

impl ModelMetadata {
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.cost_per_1m_input
            + (output_tokens as f64 / 1_000_000.0) * self.cost_per_1m_output
    }
}

/// Search filter for [`ModelRegistry::find`]. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    pub provider: Option<String>,
    pub tier: Option<ModelTier>,
    pub max_cost_per_1m_input: Option<f64>,
    pub max_cost_per_1m_output: Option<f64>,
    pub suitable_for: Option<TaskLength>,
    pub available_only: bool,
}

impl ModelFilter {
    pub fn new() -> Self {
        Self {
            available_only: true,
            ..Default::default()
        }
    }

    pub fn tier(mut self, tier: ModelTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn suitable_for(mut self, length: TaskLength) -> Self {
        self.suitable_for = Some(length);
        self
    }

    fn matches(&self, m: &ModelMetadata) -> bool {
        if self.available_only && !m.available {
            return false;
        }
        if let Some(provider) = &self.provider {
            if &m.provider != provider {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if m.tier != tier {
                return false;
            }
        }
        if let Some(max_in) = self.max_cost_per_1m_input {
            if m.cost_per_1m_input > max_in {
                return false;
            }
        }
        if let Some(max_out) = self.max_cost_per_1m_output {
            if m.cost_per_1m_output > max_out {
                return false;
            }
        }
        if let Some(length) = self.suitable_for {
            if !m.suitable_for.contains(&length) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub total_models: usize,
    pub providers: Vec<String>,
    pub fast: usize,
    pub balanced: usize,
    pub high: usize,
}

#[derive(Default)]
pub struct ModelRegistry {
    models: DashMap<String, ModelMetadata>,
    provider_models: DashMap<String, Vec<String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, metadata: ModelMetadata) {
        tracing::debug!(
            model = %metadata.model_id,
            provider = %metadata.provider,
            tier = metadata.tier.as_str(),
            "registered model"
        );
        let mut ids = self
            .provider_models
            .entry(metadata.provider.clone())
            .or_default();
        if !ids.contains(&metadata.model_id) {
            ids.push(metadata.model_id.clone());
        }
        drop(ids);
        self.models.insert(metadata.model_id.clone(), metadata);
    }

    pub fn get(&self, model_id: &str) -> Option<ModelMetadata> {
        self.models.get(model_id).map(|m| m.clone())
    }

    pub fn find(&self, filter: &ModelFilter) -> Vec<ModelMetadata> {
        let mut results: Vec<ModelMetadata> = self
            .models
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        results.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        results
    }

    pub fn provider_models(&self, provider: &str) -> Vec<ModelMetadata> {
        self.provider_models
            .get(provider)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Read each adapter's model list, pricing table, and context windows
    /// into registry entries.
    pub fn sync_from_providers(&self, providers: &[Arc<dyn AiProvider>]) {
        tracing::info!(count = providers.len(), "syncing model registry");
        for provider in providers {
            let provider_name = provider.provider_name().to_string();
            let pricing: Vec<(&'static str, (f64, f64))> = provider
                .pricing_table()
                .iter()
                .map(|(k, i, o)| (*k, (*i, *o)))
                .collect();

            for model_id in provider.available_models() {
                let (cost_in, cost_out) = match longest_prefix_match(model_id, &pricing) {
                    Some(rates) => *rates,
                    None => {
                        tracing::warn!(model = model_id, provider = %provider_name, "no pricing information for model");
                        (0.0, 0.0)
                    }
                };
                let tier = tier_for(model_id);
                self.register(ModelMetadata {
                    model_id: model_id.to_string(),
                    provider: provider_name.clone(),
                    display_name: display_name(model_id),
                    cost_per_1m_input: cost_in,
                    cost_per_1m_output: cost_out,
                    max_context_window: provider.context_window(Some(model_id)),
                    tier,
                    suitable_for: suitable_for(tier),
                    available: true,
                });
            }
        }
        tracing::info!(
            models = self.models.len(),
            providers = self.provider_models.len(),
            "model registry sync complete"
        );
    }

    pub fn summary(&self) -> RegistrySummary {
        let count_tier = |tier: ModelTier| {
            self.models
                .iter()
                .filter(|e| e.value().tier == tier && e.value().available)
                .count()
        };
        let mut providers: Vec<String> = self
            .provider_models
            .iter()
            .map(|e| e.key().clone())
            .collect();
        providers.sort();
        RegistrySummary {
            total_models: self.models.len(),
            providers,
            fast: count_tier(ModelTier::Fast),
            balanced: count_tier(ModelTier::Balanced),
            high: count_tier(ModelTier::High),
        }
    }
}

/// Heuristic tier from the model id; pricing-table overrides happen by
/// re-registering after sync.
fn tier_for(model_id: &str) -> ModelTier {
    let lower = model_id.to_lowercase();
    if ["haiku", "flash", "mini", "nano", "turbo"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        return ModelTier::Fast;
    }
    if ["opus", "pro", "gpt-5", "gpt-4.1"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        return ModelTier::High;
    }
    ModelTier::Balanced
}

fn suitable_for(tier: ModelTier) -> Vec<TaskLength> {
    match tier {
        ModelTier::Fast => vec![TaskLength::Short, TaskLength::Medium],
        ModelTier::Balanced => vec![TaskLength::Short, TaskLength::Medium, TaskLength::Long],
        ModelTier::High => vec![TaskLength::Medium, TaskLength::Long, TaskLength::Complex],
    }
}

/// `claude-haiku-4-5-20251001` → `Claude Haiku 4 5`.
fn display_name(model_id: &str) -> String {
    let parts: Vec<&str> = model_id.split('-').collect();
    if parts.len() < 2 {
        return model_id.to_string();
    }
    let capitalize = |s: &str| {
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    };
    let mut name = format!("{} {}", capitalize(parts[0]), capitalize(parts[1]));
    let versions: Vec<&str> = parts[2..]
        .iter()
        .filter(|p| p.chars().all(|c| c.is_ascii_digit() || c == '.') && p.len() <= 3)
        .copied()
        .take(2)
        .collect();
    if !versions.is_empty() {
        name.push(' ');
        name.push_str(&versions.join(" "));
    }
    name
}

static REGISTRY: OnceLock<Arc<ModelRegistry>> = OnceLock::new();

/// The process-wide registry, lazily initialized.
pub fn global_registry() -> Arc<ModelRegistry> {
    REGISTRY
        .get_or_init(|| Arc::new(ModelRegistry::new()))
        .clone()
}
