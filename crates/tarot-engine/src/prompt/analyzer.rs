//! Prompt analysis for dynamic model allocation: token estimates,
//! complexity scoring, and suitable performance tiers.

use serde::Serialize;

use crate::llm::registry::ModelTier;

/// ~3 chars/token averages Korean (~1.5 chars/token) and English (~4).
const CHARS_PER_TOKEN: f64 = 3.0;

/// Structured RAG context compresses well relative to raw text.
const RAG_CONTEXT_DISCOUNT: f64 = 0.5;

const MIN_INPUT_TOKENS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CardInterpretation,
    OverallReading,
    Relationships,
    Advice,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardInterpretation => "card_interpretation",
            Self::OverallReading => "overall_reading",
            Self::Relationships => "relationships",
            Self::Advice => "advice",
        }
    }

    fn base_output_tokens(&self) -> u32 {
        match self {
            Self::CardInterpretation => 500,
            Self::OverallReading => 2000,
            Self::Relationships => 800,
            Self::Advice => 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct PromptAnalysis {
    pub estimated_input_tokens: u32,
    pub estimated_output_tokens: u32,
    /// 0.0 = trivial, 1.0 = very complex.
    pub complexity_score: f64,
    pub urgency: Urgency,
    pub requires_high_quality: bool,
    pub suitable_tiers: Vec<ModelTier>,
    pub prompt_length: usize,
    pub card_count: usize,
    pub question_length: usize,
    pub has_rag_context: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAnalyzer;

impl PromptAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(
        &self,
        prompt: &str,
        task_type: TaskType,
        card_count: usize,
        question: Option<&str>,
        category: Option<&str>,
        rag_context_chars: Option<usize>,
        system_prompt: Option<&str>,
    ) -> PromptAnalysis {
        let prompt_length = prompt.chars().count();
        let question_length = question.map(|q| q.chars().count()).unwrap_or(0);
        let has_rag_context = rag_context_chars.is_some();

        let input_tokens =
            self.estimate_input_tokens(prompt_length, system_prompt, rag_context_chars);
        let output_tokens =
            self.estimate_output_tokens(task_type, card_count, prompt_length, question_length);
        let complexity = self.complexity(
            card_count,
            question_length,
            prompt_length,
            category,
            has_rag_context,
        );
        let urgency = self.urgency(task_type, complexity);
        let requires_high_quality = self.requires_high_quality(task_type, complexity, card_count);
        let suitable_tiers =
            self.suitable_tiers(complexity, output_tokens, requires_high_quality);

        tracing::debug!(
            task = task_type.as_str(),
            input_tokens,
            output_tokens,
            complexity,
            "prompt analyzed"
        );

        PromptAnalysis {
            estimated_input_tokens: input_tokens,
            estimated_output_tokens: output_tokens,
            complexity_score: complexity,
            urgency,
            requires_high_quality,
            suitable_tiers,
            prompt_length,
            card_count,
            question_length,
            has_rag_context,
        }
    }

    fn estimate_input_tokens(
        &self,
        prompt_chars: usize,
        system_prompt: Option<&str>,
        rag_context_chars: Option<usize>,
    ) -> u32 {
        let mut total = prompt_chars as f64;
        if let Some(system) = system_prompt {
            total += system.chars().count() as f64;
        }
        if let Some(rag_chars) = rag_context_chars {
            total += rag_chars as f64 * RAG_CONTEXT_DISCOUNT;
        }
        ((total / CHARS_PER_TOKEN) as u32).max(MIN_INPUT_TOKENS)
    }

    fn estimate_output_tokens(
        &self,
        task_type: TaskType,
        card_count: usize,
        prompt_length: usize,
        question_length: usize,
    ) -> u32 {
        let mut tokens = if task_type == TaskType::CardInterpretation && card_count > 0 {
            card_count as u32 * 400
        } else {
            task_type.base_output_tokens()
        };

        if question_length > 200 {
            tokens = (tokens as f64 * 1.3) as u32;
        } else if question_length > 100 {
            tokens = (tokens as f64 * 1.1) as u32;
        }

        if prompt_length > 5000 {
            tokens = (tokens as f64 * 1.2) as u32;
        } else if prompt_length > 3000 {
            tokens = (tokens as f64 * 1.1) as u32;
        }

        tokens
    }

    fn complexity(
        &self,
        card_count: usize,
        question_length: usize,
        prompt_length: usize,
        category: Option<&str>,
        has_rag_context: bool,
    ) -> f64 {
        let mut score: f64 = 0.0;

        score += match card_count {
            0 | 1 => 0.1,
            2..=3 => 0.2,
            4..=5 => 0.3,
            _ => 0.4,
        };

        score += if question_length > 300 {
            0.2
        } else if question_length > 150 {
            0.1
        } else if question_length > 50 {
            0.05
        } else {
            0.0
        };

        score += if prompt_length > 5000 {
            0.2
        } else if prompt_length > 3000 {
            0.15
        } else if prompt_length > 2000 {
            0.1
        } else if prompt_length > 1000 {
            0.05
        } else {
            0.0
        };

        if matches!(category, Some("spirituality") | Some("personal_growth")) {
            score += 0.1;
        }
        if has_rag_context {
            score += 0.1;
        }

        score.min(1.0)
    }

    fn urgency(&self, task_type: TaskType, complexity: f64) -> Urgency {
        if task_type == TaskType::CardInterpretation {
            return Urgency::High;
        }
        if complexity > 0.6 {
            return Urgency::Medium;
        }
        Urgency::Low
    }

    fn requires_high_quality(
        &self,
        task_type: TaskType,
        complexity: f64,
        card_count: usize,
    ) -> bool {
        task_type == TaskType::OverallReading || complexity > 0.7 || card_count >= 10
    }

    fn suitable_tiers(
        &self,
        complexity: f64,
        output_tokens: u32,
        requires_high_quality: bool,
    ) -> Vec<ModelTier> {
        let mut tiers = Vec::new();
        if requires_high_quality {
            tiers.push(ModelTier::High);
            if complexity < 0.5 {
                tiers.push(ModelTier::Balanced);
            }
        } else if complexity < 0.3 {
            tiers.extend([ModelTier::Fast, ModelTier::Balanced]);
        } else {
            tiers.extend([ModelTier::Balanced, ModelTier::High]);
        }

        if output_tokens > 2000 && !tiers.contains(&ModelTier::High) {
            tiers.push(ModelTier::High);
        }

        let order = [ModelTier::Fast, ModelTier::Balanced, ModelTier::High];
        order.into_iter().filter(|t| tiers.contains(t)).collect()
    }
}
