//! Single-call reading pipeline for one-card and three-card spreads:
//! build the prompt, call the orchestrator, parse, retry on truncation with
//! a larger output budget, validate.

use std::sync::Arc;

use super::parser::ResponseParser;
use super::spread_config::{spread_config, SpreadType};
use super::validator::ReadingValidator;
use super::{LlmCall, ReadingOutcome};
use crate::error::EngineError;
use crate::llm::{GenerationConfig, Orchestrator};
use crate::prompt::{LlmAllocator, PromptEngine};
use crate::types::{DrawnCard, UsagePurpose};

const MAX_PARSE_RETRIES: u32 = 2;
const RETRY_TOKEN_GROWTH: f64 = 1.5;

pub struct ReadingEngine {
    orchestrator: Arc<Orchestrator>,
    prompts: Arc<PromptEngine>,
    allocator: Arc<LlmAllocator>,
}

impl ReadingEngine {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        prompts: Arc<PromptEngine>,
        allocator: Arc<LlmAllocator>,
    ) -> Self {
        Self {
            orchestrator,
            prompts,
            allocator,
        }
    }

    pub async fn generate(
        &self,
        drawn_cards: &[DrawnCard],
        question: &str,
        spread_type: SpreadType,
        category: Option<&str>,
        user_context: Option<&str>,
    ) -> Result<ReadingOutcome, EngineError> {
        self.generate_with_hook(drawn_cards, question, spread_type, category, user_context, |_| {})
            .await
    }

    /// As [`generate`], invoking `on_parse_retry` with the 1-based retry
    /// number before each additional attempt (the streaming layer turns
    /// these into progress events).
    pub async fn generate_with_hook(
        &self,
        drawn_cards: &[DrawnCard],
        question: &str,
        spread_type: SpreadType,
        category: Option<&str>,
        user_context: Option<&str>,
        mut on_parse_retry: impl FnMut(u32),
    ) -> Result<ReadingOutcome, EngineError> {
        let config = spread_config(spread_type);
        let prompt = self.prompts.build_full_prompt(
            question,
            drawn_cards,
            spread_type,
            category,
            user_context,
            true,
            true,
        )?;

        let estimated_input = ((prompt.user_prompt.chars().count()
            + prompt.system_prompt.chars().count()) as f64
            / 3.0) as u32;
        let token_cap = self.allocator.truncation_cap(None, estimated_input);
        let mut max_tokens = config.max_tokens;
        let mut responses = Vec::new();

        for attempt in 0..=MAX_PARSE_RETRIES {
            if attempt > 0 {
                on_parse_retry(attempt);
            }
            let generation = GenerationConfig {
                max_tokens,
                temperature: 0.7,
                ..Default::default()
            };
            let result = self
                .orchestrator
                .generate(
                    &prompt.user_prompt,
                    Some(&prompt.system_prompt),
                    &generation,
                    None,
                )
                .await?;

            if result
                .primary
                .finish_reason
                .is_some_and(|r| r.is_truncated())
            {
                tracing::warn!(
                    attempt = attempt + 1,
                    completion_tokens = result.primary.completion_tokens,
                    max_tokens,
                    "response may be truncated"
                );
            }

            let finish_reason = result.primary.finish_reason;
            let content = result.primary.content.clone();
            responses.push(result);

            match ResponseParser::parse(&content, finish_reason) {
                Ok(reading) => {
                    ReadingValidator::validate_reading_quality(
                        &reading,
                        drawn_cards.len(),
                        config,
                    )?;
                    if attempt > 0 {
                        tracing::info!(retries = attempt, "parse succeeded after retry");
                    }
                    return Ok(ReadingOutcome {
                        reading,
                        llm_calls: label_calls(responses),
                    });
                }
                Err(e) if e.is_truncation() && attempt < MAX_PARSE_RETRIES => {
                    let previous = max_tokens;
                    max_tokens = (((max_tokens as f64) * RETRY_TOKEN_GROWTH).ceil() as u32)
                        .min(token_cap);
                    tracing::warn!(
                        previous,
                        max_tokens,
                        attempt = attempt + 2,
                        "truncated output, retrying with larger budget"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::truncation(format!(
            "response stayed truncated after {} attempts",
            MAX_PARSE_RETRIES + 1
        )))
    }
}

/// The last call produced the accepted reading; everything before it was a
/// parse retry.
fn label_calls(responses: Vec<crate::llm::OrchestratorResponse>) -> Vec<LlmCall> {
    let last = responses.len().saturating_sub(1);
    responses
        .into_iter()
        .enumerate()
        .map(|(i, response)| LlmCall {
            purpose: if i == last {
                UsagePurpose::MainReading
            } else {
                UsagePurpose::ParseRetry
            },
            response,
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::{AiError, AiProvider, AiResponse, FinishReason};
    use crate::llm::registry::ModelRegistry;
    use crate::reading::validator::tests::valid_korean_reading;
    use crate::types::{Arcana, Card, Orientation};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::time::Duration;

    /// Provider that replays a scripted sequence of responses and records
    /// the generation configs it was called with.
    pub(crate) struct ScriptedProvider {
        pub script: Mutex<VecDeque<(String, Option<FinishReason>)>>,
        pub seen_max_tokens: Mutex<Vec<u32>>,
    }

    impl ScriptedProvider {
        pub fn new(script: Vec<(String, Option<FinishReason>)>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen_max_tokens: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-model"
        }

        fn available_models(&self) -> &[&'static str] {
            &["scripted-model"]
        }

        async fn generate(
            &self,
            _prompt: &str,
            _system_prompt: Option<&str>,
            config: &GenerationConfig,
            _model: Option<&str>,
        ) -> Result<AiResponse, AiError> {
            self.seen_max_tokens.lock().push(config.max_tokens);
            let (content, finish_reason) =
                self.script.lock().pop_front().unwrap_or_else(|| {
                    ("{}".to_string(), Some(FinishReason::Stop))
                });
            Ok(AiResponse {
                content,
                model: "scripted-model".into(),
                provider: "scripted".into(),
                prompt_tokens: 100,
                completion_tokens: 200,
                total_tokens: 300,
                estimated_cost: 0.002,
                finish_reason,
                latency_ms: 5,
                created_at: Utc::now(),
            })
        }

        fn estimate_cost(&self, _p: u32, _c: u32, _m: Option<&str>) -> f64 {
            0.002
        }

        fn context_window(&self, _m: Option<&str>) -> u32 {
            100_000
        }

        fn pricing_table(&self) -> &[(&'static str, f64, f64)] {
            &[]
        }
    }

    fn engine_with(script: Vec<(String, Option<FinishReason>)>) -> (Arc<ScriptedProvider>, ReadingEngine) {
        let provider = Arc::new(ScriptedProvider::new(script));
        let orchestrator = Arc::new(
            Orchestrator::new(vec![provider.clone()], Duration::from_secs(30), 2).unwrap(),
        );
        let prompts = Arc::new(
            PromptEngine::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("prompts")).unwrap(),
        );
        let allocator = Arc::new(LlmAllocator::new(Arc::new(ModelRegistry::new())));
        (provider, ReadingEngine::new(orchestrator, prompts, allocator))
    }

    fn fool() -> DrawnCard {
        DrawnCard::new(
            Card {
                id: 0,
                name: "The Fool".into(),
                name_ko: "바보".into(),
                arcana: Arcana::Major,
                suit: None,
                number: Some(0),
                keywords_upright: vec!["beginnings".into()],
                keywords_reversed: vec!["hesitation".into()],
                meaning_upright: "A leap of faith.".into(),
                meaning_reversed: "Holding back.".into(),
                description: None,
                symbolism: None,
                image_url: None,
            },
            Orientation::Upright,
        )
    }

    #[tokio::test]
    async fn single_call_success() {
        let valid = valid_korean_reading(&["present"]).to_json();
        let (provider, engine) = engine_with(vec![(valid, Some(FinishReason::Stop))]);

        let outcome = engine
            .generate(
                &[fool()],
                "오늘 무엇에 집중해야 할까요?",
                SpreadType::OneCard,
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.reading.cards.len(), 1);
        assert_eq!(outcome.llm_calls.len(), 1);
        assert_eq!(outcome.llm_calls[0].purpose, UsagePurpose::MainReading);
        assert_eq!(provider.seen_max_tokens.lock().as_slice(), &[2000]);
    }

    #[tokio::test]
    async fn truncation_retries_with_larger_budget() {
        let valid = valid_korean_reading(&["present"]).to_json();
        let truncated = valid[..valid.len() / 2].to_string();
        let (provider, engine) = engine_with(vec![
            (truncated, Some(FinishReason::MaxTokens)),
            (valid, Some(FinishReason::Stop)),
        ]);

        let mut retries = Vec::new();
        let outcome = engine
            .generate_with_hook(
                &[fool()],
                "질문",
                SpreadType::OneCard,
                None,
                None,
                |n| retries.push(n),
            )
            .await
            .unwrap();

        let seen = provider.seen_max_tokens.lock().clone();
        assert_eq!(seen.len(), 2);
        // Second attempt uses ceil(1.5 × first).
        assert_eq!(seen[1], (seen[0] as f64 * 1.5).ceil() as u32);
        assert_eq!(retries, vec![1]);

        assert_eq!(outcome.llm_calls.len(), 2);
        assert_eq!(outcome.llm_calls[0].purpose, UsagePurpose::ParseRetry);
        assert_eq!(outcome.llm_calls[1].purpose, UsagePurpose::MainReading);
    }

    #[tokio::test]
    async fn persistent_truncation_exhausts_retries() {
        let truncated = r#"{"cards": [{"card_id": "0""#.to_string();
        let (provider, engine) = engine_with(vec![
            (truncated.clone(), Some(FinishReason::MaxTokens)),
            (truncated.clone(), Some(FinishReason::MaxTokens)),
            (truncated, Some(FinishReason::MaxTokens)),
        ]);

        let err = engine
            .generate(&[fool()], "질문", SpreadType::OneCard, None, None)
            .await
            .unwrap_err();
        assert!(err.is_truncation());
        assert_eq!(provider.seen_max_tokens.lock().len(), 3);
    }

    #[tokio::test]
    async fn non_truncation_parse_error_fails_immediately() {
        let (provider, engine) = engine_with(vec![(
            "no json in this answer at all".to_string(),
            Some(FinishReason::Stop),
        )]);

        let err = engine
            .generate(&[fool()], "질문", SpreadType::OneCard, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::JsonExtraction { .. }));
        assert!(!err.is_truncation());
        assert_eq!(provider.seen_max_tokens.lock().len(), 1);
    }

    #[tokio::test]
    async fn validation_failure_propagates() {
        let mut reading = valid_korean_reading(&["present"]);
        reading.cards[0].interpretation = "너무 짧음".into();
        let (_, engine) = engine_with(vec![(reading.to_json(), Some(FinishReason::Stop))]);

        let err = engine
            .generate(&[fool()], "질문", SpreadType::OneCard, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
