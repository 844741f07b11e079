//! Two-phase parallel pipeline for the Celtic Cross. Phase 1 interprets
//! the ten positions in batches of concurrent LLM calls; phase 2 produces
//! the overall reading and relationship analysis concurrently, then derives
//! the advice from a summary of the overall reading. A shared semaphore
//! caps in-flight calls across both phases.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use super::citation::{CardCitation, CitationFormatter};
use super::parser::ResponseParser;
use super::schemas::{Advice, CardInterpretation, ReadingResponse};
use super::spread_config::{spread_config, SpreadConfig, SpreadType};
use super::{LlmCall, ReadingOutcome};
use crate::error::EngineError;
use crate::llm::{GenerationConfig, Orchestrator, OrchestratorResponse};
use crate::prompt::{
    build_card_context, LlmAllocator, PromptAnalyzer, PromptEngine, PromptKind, TaskType,
};
use crate::types::{DrawnCard, UsagePurpose};

const MAX_BATCH_RETRIES: u32 = 2;
const RETRY_TOKEN_GROWTH: f64 = 1.5;

/// Characters of the overall reading handed to the advice prompt.
const OVERALL_SUMMARY_CHARS: usize = 500;

#[derive(Deserialize)]
struct CardsSection {
    #[serde(default)]
    cards: Vec<CardInterpretation>,
}

#[derive(Deserialize)]
struct OverallSection {
    #[serde(default)]
    overall_reading: String,
    #[serde(default)]
    summary: String,
}

#[derive(Deserialize)]
struct RelationshipsSection {
    #[serde(default)]
    card_relationships: String,
}

#[derive(Deserialize)]
struct AdviceSection {
    advice: Advice,
}

struct BatchCard {
    context: Value,
}

pub struct ParallelReadingEngine {
    orchestrator: Arc<Orchestrator>,
    prompts: Arc<PromptEngine>,
    allocator: Arc<LlmAllocator>,
    analyzer: PromptAnalyzer,
    config: &'static SpreadConfig,
    semaphore: Arc<Semaphore>,
    system_prompt: String,
}

impl ParallelReadingEngine {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        prompts: Arc<PromptEngine>,
        allocator: Arc<LlmAllocator>,
        spread_type: SpreadType,
    ) -> Result<Self, EngineError> {
        let config = spread_config(spread_type);
        if !config.supports_parallel {
            return Err(EngineError::InvalidInput(format!(
                "spread type {} does not support parallel processing",
                spread_type.as_str()
            )));
        }
        let system_prompt = prompts.render_system_prompt().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load system prompt, using fallback");
            "You are a professional tarot reader.".to_string()
        });
        tracing::info!(
            spread = spread_type.as_str(),
            batch_size = config.batch_size,
            max_concurrent = config.max_concurrent_calls,
            "parallel reading engine initialized"
        );
        Ok(Self {
            orchestrator,
            prompts,
            allocator,
            analyzer: PromptAnalyzer::new(),
            config,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls)),
            system_prompt,
        })
    }

    pub async fn generate_reading(
        &self,
        drawn_cards: &[DrawnCard],
        question: &str,
        category: Option<&str>,
        rag_context: Option<&str>,
    ) -> Result<ReadingOutcome, EngineError> {
        let expected = self.config.card_count;
        if drawn_cards.len() != expected {
            return Err(EngineError::InvalidInput(format!(
                "{} requires exactly {expected} cards, got {}",
                self.config.spread_type.as_str(),
                drawn_cards.len()
            )));
        }

        tracing::info!(cards = drawn_cards.len(), "starting parallel reading generation");
        let cards_context: Vec<Value> = drawn_cards.iter().map(build_card_context).collect();
        let batches = self.create_batches(&cards_context);
        tracing::info!(batches = batches.len(), "phase 1: interpreting card batches");

        let batch_results = futures::future::try_join_all(
            batches
                .iter()
                .map(|batch| self.interpret_batch(batch, question, category, rag_context)),
        )
        .await?;

        let mut interpretations: Vec<CardInterpretation> = Vec::new();
        let mut llm_calls: Vec<LlmCall> = Vec::new();
        for (cards, calls) in batch_results {
            interpretations.extend(cards);
            llm_calls.extend(calls);
        }

        // Batches complete in arbitrary order; restore the spread's
        // canonical position order.
        interpretations.sort_by_key(|c| {
            self.config
                .position_index(&c.position)
                .unwrap_or(usize::MAX)
        });
        tracing::info!(
            count = interpretations.len(),
            "phase 1 complete, generating overall reading, relationships, and advice"
        );

        let card_summaries = self.build_card_summaries(&interpretations, &cards_context);

        let (overall, relationships) = tokio::try_join!(
            self.generate_overall(question, category, &card_summaries, rag_context),
            self.generate_relationships(question, category, &card_summaries)
        )?;
        let (overall_reading, summary, overall_call) = overall;
        let (card_relationships, relationships_call) = relationships;
        if let Some(call) = overall_call {
            llm_calls.push(call);
        }
        if let Some(call) = relationships_call {
            llm_calls.push(call);
        }

        let overall_summary: String = overall_reading
            .chars()
            .take(OVERALL_SUMMARY_CHARS)
            .collect();
        let (advice, advice_call) = self
            .generate_advice(question, category, &card_summaries, &overall_summary)
            .await?;
        if let Some(call) = advice_call {
            llm_calls.push(call);
        }

        let citations = interpretations
            .iter()
            .map(|interp| CardCitation {
                card_name: card_name_for(&cards_context, &interp.card_id),
                position_name: self
                    .config
                    .position_name(&interp.position)
                    .unwrap_or(interp.position.as_str())
                    .to_string(),
            })
            .collect();
        let overall_with_citations =
            CitationFormatter::new(citations).add_citations(&overall_reading);

        tracing::info!("parallel reading generation complete");
        Ok(ReadingOutcome {
            reading: ReadingResponse {
                cards: interpretations,
                card_relationships,
                overall_reading: overall_with_citations,
                advice,
                summary,
            },
            llm_calls,
        })
    }

    fn create_batches(&self, cards_context: &[Value]) -> Vec<Vec<BatchCard>> {
        let positions = self.config.positions;
        let batches: Vec<Vec<BatchCard>> = cards_context
            .chunks(self.config.batch_size)
            .enumerate()
            .map(|(batch_index, chunk)| {
                chunk
                    .iter()
                    .enumerate()
                    .map(|(offset, card_context)| {
                        let index = batch_index * self.config.batch_size + offset;
                        let mut context = card_context.clone();
                        if let Some(position) = positions.get(index) {
                            let object = context.as_object_mut().expect("card context is an object");
                            object.insert("position".into(), json!(position.position));
                            object.insert("position_index".into(), json!(position.index));
                            object.insert("position_name".into(), json!(position.name));
                            object.insert("position_meaning".into(), json!(position.meaning));
                        }
                        BatchCard { context }
                    })
                    .collect()
            })
            .collect();
        tracing::info!(
            batches = batches.len(),
            batch_size = self.config.batch_size,
            "created card batches"
        );
        batches
    }

    /// Interpret one batch, retrying with a larger output budget when the
    /// response comes back truncated.
    async fn interpret_batch(
        &self,
        batch: &[BatchCard],
        question: &str,
        category: Option<&str>,
        rag_context: Option<&str>,
    ) -> Result<(Vec<CardInterpretation>, Vec<LlmCall>), EngineError> {
        let template = self.prompts.load(PromptKind::CelticCardBatch)?;
        let cards: Vec<&Value> = batch.iter().map(|c| &c.context).collect();
        let rendered = template.render(&json!({
            "question": question,
            "category": category,
            "cards": cards,
        }));
        let full_prompt = format!("{rendered}\n\n{}", self.prompts.render_output_format()?);

        let analysis = self.analyzer.analyze(
            &full_prompt,
            TaskType::CardInterpretation,
            batch.len(),
            Some(question),
            category,
            rag_context.map(|s| s.chars().count()),
            Some(&self.system_prompt),
        );
        let allocated = self.allocator.allocate(&analysis, TaskType::CardInterpretation);
        let token_cap = self
            .allocator
            .truncation_cap(allocated.model.as_deref(), analysis.estimated_input_tokens);

        let mut max_tokens = allocated.max_tokens;
        let mut calls: Vec<LlmCall> = Vec::new();

        for attempt in 0..=MAX_BATCH_RETRIES {
            let response = self
                .bounded_generate(&full_prompt, max_tokens, allocated.temperature, allocated.model.as_deref())
                .await?;
            let finish_reason = response.primary.finish_reason;
            let content = response.primary.content.clone();
            calls.push(LlmCall {
                purpose: UsagePurpose::CardBatch,
                response,
            });

            match ResponseParser::parse_value::<CardsSection>(&content, finish_reason) {
                Ok(section) if !section.cards.is_empty() => {
                    return Ok((section.cards, calls));
                }
                Ok(_) => {
                    return Err(EngineError::Validation(
                        "batch interpretation returned no cards".into(),
                    ));
                }
                Err(e) if e.is_truncation() && attempt < MAX_BATCH_RETRIES => {
                    let previous = max_tokens;
                    max_tokens =
                        (((max_tokens as f64) * RETRY_TOKEN_GROWTH).ceil() as u32).min(token_cap);
                    tracing::warn!(
                        previous,
                        max_tokens,
                        attempt = attempt + 2,
                        "batch output truncated, retrying with larger budget"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::truncation(format!(
            "batch interpretation stayed truncated after {} attempts",
            MAX_BATCH_RETRIES + 1
        )))
    }

    async fn generate_overall(
        &self,
        question: &str,
        category: Option<&str>,
        card_summaries: &[Value],
        rag_context: Option<&str>,
    ) -> Result<(String, String, Option<LlmCall>), EngineError> {
        let template = self.prompts.load(PromptKind::CelticOverall)?;
        let rendered = template.render(&json!({
            "question": question,
            "category": category,
            "card_summaries": card_summaries,
        }));
        let full_prompt = format!("{rendered}\n\n{}", self.prompts.render_output_format()?);

        let analysis = self.analyzer.analyze(
            &full_prompt,
            TaskType::OverallReading,
            card_summaries.len(),
            Some(question),
            category,
            rag_context.map(|s| s.chars().count()),
            Some(&self.system_prompt),
        );
        let allocated = self.allocator.allocate(&analysis, TaskType::OverallReading);

        let response = self
            .bounded_generate(
                &full_prompt,
                allocated.max_tokens,
                allocated.temperature,
                allocated.model.as_deref(),
            )
            .await?;
        let section: OverallSection =
            ResponseParser::parse_value(&response.primary.content, response.primary.finish_reason)?;
        Ok((
            section.overall_reading,
            section.summary,
            Some(LlmCall {
                purpose: UsagePurpose::OverallReading,
                response,
            }),
        ))
    }

    async fn generate_relationships(
        &self,
        question: &str,
        category: Option<&str>,
        card_summaries: &[Value],
    ) -> Result<(String, Option<LlmCall>), EngineError> {
        // Relationship analysis is optional; a missing template falls back
        // to an empty section.
        let template = match self.prompts.load(PromptKind::CelticRelationships) {
            Ok(template) => template,
            Err(e) => {
                tracing::warn!(error = %e, "no relationships template, skipping analysis");
                return Ok((String::new(), None));
            }
        };
        let rendered = template.render(&json!({
            "question": question,
            "category": category,
            "card_summaries": card_summaries,
        }));
        let full_prompt = format!("{rendered}\n\n{}", self.prompts.render_output_format()?);

        let analysis = self.analyzer.analyze(
            &full_prompt,
            TaskType::Relationships,
            card_summaries.len(),
            Some(question),
            category,
            None,
            Some(&self.system_prompt),
        );
        let allocated = self.allocator.allocate(&analysis, TaskType::Relationships);

        let response = self
            .bounded_generate(
                &full_prompt,
                allocated.max_tokens,
                allocated.temperature,
                allocated.model.as_deref(),
            )
            .await?;
        let section: RelationshipsSection =
            ResponseParser::parse_value(&response.primary.content, response.primary.finish_reason)?;
        Ok((
            section.card_relationships,
            Some(LlmCall {
                purpose: UsagePurpose::Relationships,
                response,
            }),
        ))
    }

    async fn generate_advice(
        &self,
        question: &str,
        category: Option<&str>,
        card_summaries: &[Value],
        overall_reading_summary: &str,
    ) -> Result<(Advice, Option<LlmCall>), EngineError> {
        let template = match self.prompts.load(PromptKind::CelticAdvice) {
            Ok(template) => template,
            Err(e) => {
                tracing::warn!(error = %e, "no advice template, using default advice");
                return Ok((default_advice(), None));
            }
        };
        let rendered = template.render(&json!({
            "question": question,
            "category": category,
            "card_summaries": card_summaries,
            "overall_reading_summary": overall_reading_summary,
        }));
        let full_prompt = format!("{rendered}\n\n{}", self.prompts.render_output_format()?);

        let analysis = self.analyzer.analyze(
            &full_prompt,
            TaskType::Advice,
            card_summaries.len(),
            Some(question),
            category,
            None,
            Some(&self.system_prompt),
        );
        let allocated = self.allocator.allocate(&analysis, TaskType::Advice);

        let response = self
            .bounded_generate(
                &full_prompt,
                allocated.max_tokens,
                allocated.temperature,
                allocated.model.as_deref(),
            )
            .await?;
        let section: AdviceSection =
            ResponseParser::parse_value(&response.primary.content, response.primary.finish_reason)?;
        Ok((
            section.advice,
            Some(LlmCall {
                purpose: UsagePurpose::Advice,
                response,
            }),
        ))
    }

    /// One orchestrator call under the engine-wide concurrency cap.
    async fn bounded_generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        model: Option<&str>,
    ) -> Result<OrchestratorResponse, EngineError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EngineError::InvalidInput("engine semaphore closed".into()))?;
        let generation = GenerationConfig {
            max_tokens,
            temperature,
            ..Default::default()
        };
        Ok(self
            .orchestrator
            .generate(prompt, Some(&self.system_prompt), &generation, model)
            .await?)
    }

    fn build_card_summaries(
        &self,
        interpretations: &[CardInterpretation],
        cards_context: &[Value],
    ) -> Vec<Value> {
        interpretations
            .iter()
            .map(|interp| {
                json!({
                    "card_id": interp.card_id,
                    "name": card_name_for(cards_context, &interp.card_id),
                    "position": interp.position,
                    "position_index": self.config.position_index(&interp.position),
                    "position_name": self
                        .config
                        .position_name(&interp.position)
                        .unwrap_or(interp.position.as_str()),
                    "orientation_korean": orientation_for(cards_context, &interp.card_id),
                    "interpretation": interp.interpretation,
                    "key_message": interp.key_message,
                })
            })
            .collect()
    }
}

fn card_name_for(cards_context: &[Value], card_id: &str) -> String {
    cards_context
        .iter()
        .find(|c| c["id"].to_string() == *card_id || c["id"].as_u64().map(|v| v.to_string()).as_deref() == Some(card_id))
        .and_then(|c| c["name"].as_str())
        .unwrap_or(card_id)
        .to_string()
}

fn orientation_for(cards_context: &[Value], card_id: &str) -> String {
    cards_context
        .iter()
        .find(|c| c["id"].as_u64().map(|v| v.to_string()).as_deref() == Some(card_id))
        .and_then(|c| c["orientation_korean"].as_str())
        .unwrap_or("정방향")
        .to_string()
}

fn default_advice() -> Advice {
    Advice {
        immediate_action: "현재 상황을 고려하여 즉시 실천 가능한 작은 행동을 시작하세요.".into(),
        short_term: "앞으로 2-3주 동안 집중할 목표를 설정하세요.".into(),
        long_term: Some("장기적인 방향성을 고려하여 계획을 세우세요.".into()),
        mindset: Some("긍정적이면서도 현실적인 마음가짐을 유지하세요.".into()),
        cautions: Some("성급한 결정을 피하고 신중하게 접근하세요.".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AiError, AiProvider, AiResponse, FinishReason};
    use crate::llm::registry::ModelRegistry;
    use crate::types::{Arcana, Card, Orientation};
    use async_trait::async_trait;
    use chrono::Utc;
    use regex::Regex;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers each prompt according to which pipeline stage produced it,
    /// and tracks the peak number of in-flight calls.
    struct StageAwareProvider {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl StageAwareProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        fn answer(&self, prompt: &str) -> String {
            if prompt.contains("종합 해석 단계") {
                let overall = "열 장의 카드는 하나의 긴 여정을 그리고 있습니다. \
                               과거의 경험이 현재의 도전을 만들었고, 그 도전을 \
                               마주하는 태도가 미래를 결정합니다. 지금은 흐름을 \
                               거스르기보다 이해하려는 자세가 필요한 때입니다."
                    .repeat(2);
                return json!({"overall_reading": overall, "summary": "여정의 전환점에 서 있습니다"})
                    .to_string();
            }
            if prompt.contains("관계 분석 단계") {
                return json!({"card_relationships": "현재 상황과 도전 과제가 긴장을 이루고 있습니다"})
                    .to_string();
            }
            if prompt.contains("조언 단계") {
                return json!({"advice": {
                    "immediate_action": "오늘 한 가지 작은 결정을 실제로 내려 보세요",
                    "short_term": "앞으로 이 주간은 주변의 변화를 관찰하는 데 집중하세요",
                    "long_term": "방향을 정했다면 꾸준히 밀고 나가세요",
                    "mindset": "열린 마음을 유지하세요",
                    "cautions": "서두르지 마세요"
                }})
                .to_string();
            }

            // Card batch: read back the position keys and card ids the
            // prompt asked about.
            let position_re = Regex::new(r"\(([a-z_]+)\)").unwrap();
            let id_re = Regex::new(r"카드 ID: (\d+)").unwrap();
            let positions: Vec<&str> = position_re
                .captures_iter(prompt)
                .map(|c| c.get(1).unwrap().as_str())
                .collect();
            let ids: Vec<&str> = id_re
                .captures_iter(prompt)
                .map(|c| c.get(1).unwrap().as_str())
                .collect();
            let cards: Vec<Value> = positions
                .iter()
                .zip(ids.iter())
                .map(|(position, id)| {
                    json!({
                        "card_id": id,
                        "position": position,
                        "interpretation": "이 자리의 카드는 변화를 받아들이는 용기에 대해 말하고 있으며, 지금의 선택이 다음 단계를 결정한다는 점을 강조합니다.",
                        "key_message": "용기 있게 받아들이세요"
                    })
                })
                .collect();
            json!({"cards": cards}).to_string()
        }
    }

    #[async_trait]
    impl AiProvider for StageAwareProvider {
        fn provider_name(&self) -> &str {
            "stage-aware"
        }

        fn default_model(&self) -> &str {
            "stage-model"
        }

        fn available_models(&self) -> &[&'static str] {
            &["stage-model"]
        }

        async fn generate(
            &self,
            prompt: &str,
            _system_prompt: Option<&str>,
            _config: &GenerationConfig,
            _model: Option<&str>,
        ) -> Result<AiResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let content = self.answer(prompt);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(AiResponse {
                content,
                model: "stage-model".into(),
                provider: "stage-aware".into(),
                prompt_tokens: 100,
                completion_tokens: 400,
                total_tokens: 500,
                estimated_cost: 0.003,
                finish_reason: Some(FinishReason::Stop),
                latency_ms: 10,
                created_at: Utc::now(),
            })
        }

        fn estimate_cost(&self, _p: u32, _c: u32, _m: Option<&str>) -> f64 {
            0.003
        }

        fn context_window(&self, _m: Option<&str>) -> u32 {
            100_000
        }

        fn pricing_table(&self) -> &[(&'static str, f64, f64)] {
            &[]
        }
    }

    fn ten_cards() -> Vec<DrawnCard> {
        (0..10)
            .map(|i| {
                DrawnCard::new(
                    Card {
                        id: i,
                        name: format!("Card {i}"),
                        name_ko: format!("카드 {i}"),
                        arcana: Arcana::Major,
                        suit: None,
                        number: Some(i),
                        keywords_upright: vec!["keyword".into()],
                        keywords_reversed: vec!["reversed keyword".into()],
                        meaning_upright: "upright meaning".into(),
                        meaning_reversed: "reversed meaning".into(),
                        description: None,
                        symbolism: None,
                        image_url: None,
                    },
                    if i % 3 == 0 {
                        Orientation::Reversed
                    } else {
                        Orientation::Upright
                    },
                )
            })
            .collect()
    }

    fn engine(provider: Arc<StageAwareProvider>) -> ParallelReadingEngine {
        let orchestrator = Arc::new(
            Orchestrator::new(vec![provider], Duration::from_secs(30), 1).unwrap(),
        );
        let prompts = Arc::new(
            PromptEngine::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("prompts")).unwrap(),
        );
        let allocator = Arc::new(LlmAllocator::new(Arc::new(ModelRegistry::new())));
        ParallelReadingEngine::new(orchestrator, prompts, allocator, SpreadType::CelticCross)
            .unwrap()
    }

    #[tokio::test]
    async fn celtic_cross_full_pipeline() {
        let provider = Arc::new(StageAwareProvider::new());
        let engine = engine(provider.clone());
        let cards = ten_cards();

        let outcome = engine
            .generate_reading(&cards, "제 커리어는 어떻게 흘러갈까요?", Some("career"), None)
            .await
            .unwrap();

        // Ten interpretations, ordered by the spread's position layout.
        assert_eq!(outcome.reading.cards.len(), 10);
        let expected_order: Vec<&str> = spread_config(SpreadType::CelticCross)
            .positions
            .iter()
            .map(|p| p.position)
            .collect();
        let actual_order: Vec<&str> = outcome
            .reading
            .cards
            .iter()
            .map(|c| c.position.as_str())
            .collect();
        assert_eq!(actual_order, expected_order);

        // 4 phase-1 batches (10 cards / batch of 3) + overall +
        // relationships + advice.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 7);
        // The semaphore bounds in-flight calls across both phases.
        assert!(provider.peak_in_flight.load(Ordering::SeqCst) <= 5);

        assert!(!outcome.reading.overall_reading.is_empty());
        assert!(!outcome.reading.card_relationships.is_empty());
        assert!(!outcome.reading.advice.immediate_action.is_empty());
        assert_eq!(outcome.llm_calls.len(), 7);

        let batch_calls = outcome
            .llm_calls
            .iter()
            .filter(|c| c.purpose == UsagePurpose::CardBatch)
            .count();
        assert_eq!(batch_calls, 4);
    }

    #[tokio::test]
    async fn wrong_card_count_is_rejected() {
        let provider = Arc::new(StageAwareProvider::new());
        let engine = engine(provider);
        let cards = ten_cards()[..3].to_vec();
        let err = engine
            .generate_reading(&cards, "질문", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn non_parallel_spread_rejected_at_construction() {
        let provider = Arc::new(StageAwareProvider::new());
        let orchestrator = Arc::new(
            Orchestrator::new(vec![provider as Arc<dyn AiProvider>], Duration::from_secs(30), 1)
                .unwrap(),
        );
        let prompts = Arc::new(
            PromptEngine::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("prompts")).unwrap(),
        );
        let allocator = Arc::new(LlmAllocator::new(Arc::new(ModelRegistry::new())));
        let err =
            ParallelReadingEngine::new(orchestrator, prompts, allocator, SpreadType::OneCard)
                .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn default_advice_has_all_fields() {
        let advice = default_advice();
        assert!(!advice.immediate_action.is_empty());
        assert!(advice.cautions.is_some());
    }
}
