//! The staged reading stream: draw cards, enrich context, generate, emit
//! section results, schedule background persistence, complete. Every
//! failure collapses into exactly one terminal `error` event.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::{EventStream, ReadingStage, SseEvent};
use crate::config::{OrchestratorCell, SettingsSource};
use crate::db::DatabaseProvider;
use crate::error::EngineError;
use crate::llm::Orchestrator;
use crate::prompt::{LlmAllocator, PromptEngine};
use crate::rag::enricher::{CardRef, ContextEnricher, ContextFormat, EnrichedContext};
use crate::reading::{
    spread_config, LlmCall, ParallelReadingEngine, ReadingEngine, ReadingOutcome, ReadingResponse,
    SpreadType,
};
use crate::shuffle::CardShuffleService;
use crate::types::{
    DrawnCard, LlmUsageLog, PersistedCard, PersistedReading, ReadingRequest, UsagePurpose,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct StreamingReadingService {
    orchestrator_cell: Arc<OrchestratorCell>,
    settings: Arc<dyn SettingsSource>,
    enricher: Arc<ContextEnricher>,
    prompts: Arc<PromptEngine>,
    allocator: Arc<LlmAllocator>,
    db: Arc<dyn DatabaseProvider>,
    persistence_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamingReadingService {
    pub fn new(
        orchestrator_cell: Arc<OrchestratorCell>,
        settings: Arc<dyn SettingsSource>,
        enricher: Arc<ContextEnricher>,
        prompts: Arc<PromptEngine>,
        allocator: Arc<LlmAllocator>,
        db: Arc<dyn DatabaseProvider>,
    ) -> Self {
        Self {
            orchestrator_cell,
            settings,
            enricher,
            prompts,
            allocator,
            db,
            persistence_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start generating and return the lazy SSE event sequence. Generation
    /// runs in its own task; dropping the stream stops delivery but does
    /// not cancel already-scheduled persistence.
    pub fn generate_stream(
        self: &Arc<Self>,
        request: ReadingRequest,
        user_id: impl Into<String>,
    ) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let service = self.clone();
        let user_id = user_id.into();

        tokio::spawn(async move {
            let started = Instant::now();
            if let Err(e) = service.run(&tx, &request, &user_id, started).await {
                tracing::error!(error = %e, "streamed reading failed");
                let details: String = e.to_string().chars().take(500).collect();
                let _ = tx
                    .send(
                        SseEvent::Error {
                            error_type: e.kind().to_string(),
                            message: e.to_string(),
                            details,
                            stage: ReadingStage::GeneratingAi,
                        }
                        .to_sse(),
                    )
                    .await;
            }
        });

        EventStream::new(rx)
    }

    /// Await all in-flight persistence tasks (graceful shutdown, tests).
    pub async fn wait_for_persistence(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.persistence_tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn run(
        &self,
        tx: &mpsc::Sender<String>,
        request: &ReadingRequest,
        user_id: &str,
        started: Instant,
    ) -> Result<(), EngineError> {
        let emit = |event: SseEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.to_sse()).await;
            }
        };
        let config = spread_config(request.spread_type);

        // Stage 1: initialize.
        emit(SseEvent::progress(
            ReadingStage::Initializing,
            0,
            "리딩 준비 중...",
        ))
        .await;
        emit(SseEvent::Started {
            message: "타로 리딩을 시작합니다".into(),
        })
        .await;

        // Stage 2: draw cards.
        let drawn_cards = if let Some(selected) = &request.selected_card_ids {
            emit(SseEvent::progress(
                ReadingStage::DrawingCards,
                10,
                "선택한 카드를 준비하는 중...",
            ))
            .await;
            if selected.len() != config.card_count {
                return Err(EngineError::InvalidInput(format!(
                    "selected {} cards but {} requires {}",
                    selected.len(),
                    request.spread_type.as_str(),
                    config.card_count
                )));
            }
            CardShuffleService::from_selection(
                selected,
                request.reversed_states.as_deref(),
                self.db.as_ref(),
            )
            .await?
        } else {
            emit(SseEvent::progress(
                ReadingStage::DrawingCards,
                10,
                "카드를 뽑는 중...",
            ))
            .await;
            CardShuffleService::draw_cards(config.card_count, self.db.as_ref()).await?
        };

        for (index, drawn) in drawn_cards.iter().enumerate() {
            let progress = 10 + ((index + 1) * 20 / drawn_cards.len()) as u8;
            let position = config
                .positions
                .get(index)
                .map(|p| p.name)
                .unwrap_or("포지션");
            emit(SseEvent::CardDrawn {
                card_id: drawn.card.id,
                card_name: drawn.card.name.clone(),
                card_name_ko: drawn.card.name_ko.clone(),
                position: position.to_string(),
                is_reversed: drawn.is_reversed(),
                progress,
            })
            .await;
        }
        tracing::info!(
            cards = ?drawn_cards
                .iter()
                .map(|d| format!("{}({})", d.card.name, d.orientation.as_str()))
                .collect::<Vec<_>>(),
            "cards selected"
        );

        // Stage 3: RAG enrichment.
        emit(SseEvent::Progress {
            stage: ReadingStage::EnrichingContext,
            progress: 35,
            message: "카드 의미 검색 중...".into(),
            detail: Some("타로 지식 데이터베이스에서 카드 정보를 가져오고 있습니다".into()),
        })
        .await;

        let card_refs: Vec<CardRef> = drawn_cards.iter().map(CardRef::from).collect();
        let rag_context = self
            .enricher
            .enrich(
                &card_refs,
                request.spread_type.as_str(),
                &request.question,
                Some(request.category.as_deref().unwrap_or("general")),
                "ko",
            )
            .await;

        emit(SseEvent::RagEnrichment {
            cards_enriched: rag_context
                .cards_context
                .iter()
                .filter(|c| c.card.is_some())
                .count(),
            spread_context_loaded: rag_context.spread_context.spread.is_some(),
            category_context_loaded: rag_context.category_context.category.is_some(),
        })
        .await;
        emit(SseEvent::progress(
            ReadingStage::EnrichingContext,
            50,
            "컨텍스트 준비 완료",
        ))
        .await;

        // Stage 4: AI generation.
        emit(SseEvent::Progress {
            stage: ReadingStage::GeneratingAi,
            progress: 60,
            message: "AI 리딩 생성 중...".into(),
            detail: Some("AI가 타로 리딩을 해석하고 있습니다".into()),
        })
        .await;

        let orchestrator = self
            .orchestrator_cell
            .get_or_build(self.settings.as_ref(), true)
            .await
            .map_err(|e| {
                EngineError::InvalidInput(format!("failed to initialize orchestrator: {e}"))
            })?;
        let status = orchestrator.provider_status();
        emit(SseEvent::AiGeneration {
            provider: status.primary_provider.name,
            model: status.primary_provider.model,
            message: "AI 리딩 생성 시작".into(),
        })
        .await;

        let outcome = self
            .generate_reading(&orchestrator, &drawn_cards, request, &rag_context, tx)
            .await?;
        emit(SseEvent::progress(
            ReadingStage::GeneratingAi,
            80,
            "AI 리딩 생성 완료",
        ))
        .await;

        // Stage 5: section results.
        emit(SseEvent::progress(
            ReadingStage::Finalizing,
            82,
            "리딩 분석 중...",
        ))
        .await;

        let cards_payload = build_cards_payload(&drawn_cards, &outcome.reading);
        emit(SseEvent::SectionComplete {
            section: "summary",
            data: json!({"summary": outcome.reading.summary}),
            progress: 84,
        })
        .await;
        emit(SseEvent::SectionComplete {
            section: "cards",
            data: json!({"cards": cards_payload}),
            progress: 86,
        })
        .await;
        emit(SseEvent::SectionComplete {
            section: "overall_reading",
            data: json!({"overall_reading": outcome.reading.overall_reading}),
            progress: 88,
        })
        .await;
        emit(SseEvent::SectionComplete {
            section: "advice",
            data: json!({"advice": outcome.reading.advice}),
            progress: 90,
        })
        .await;

        // Stage 6: schedule persistence.
        emit(SseEvent::progress(
            ReadingStage::Finalizing,
            92,
            "리딩 저장 예약 중...",
        ))
        .await;

        let reading_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let persisted = PersistedReading {
            id: reading_id.clone(),
            user_id: user_id.to_string(),
            spread_type: request.spread_type,
            question: request.question.clone(),
            category: request.category.clone().unwrap_or_else(|| "general".into()),
            cards: cards_payload,
            card_relationships: outcome.reading.card_relationships.clone(),
            overall_reading: outcome.reading.overall_reading.clone(),
            advice: outcome.reading.advice.clone(),
            summary: outcome.reading.summary.clone(),
            created_at: now,
            updated_at: now,
            llm_usage: build_usage_logs(&outcome.llm_calls),
        };
        self.schedule_persistence(persisted);

        emit(SseEvent::progress(
            ReadingStage::Finalizing,
            95,
            "저장 백그라운드 처리 중",
        ))
        .await;

        // Stage 7: complete.
        emit(SseEvent::progress(
            ReadingStage::Completed,
            100,
            "리딩 완료!",
        ))
        .await;
        let total_time = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        emit(SseEvent::Complete {
            reading_id: reading_id.clone(),
            total_time,
            reading_summary: json!({
                "reading_id": reading_id,
                "question": request.question,
                "spread_type": request.spread_type.as_str(),
                "card_count": drawn_cards.len(),
                "category": request.category,
                "status": "pending",
            }),
        })
        .await;
        tracing::info!(%reading_id, total_time, "reading generated, persistence scheduled");
        Ok(())
    }

    async fn generate_reading(
        &self,
        orchestrator: &Arc<Orchestrator>,
        drawn_cards: &[DrawnCard],
        request: &ReadingRequest,
        rag_context: &EnrichedContext,
        tx: &mpsc::Sender<String>,
    ) -> Result<ReadingOutcome, EngineError> {
        let formatted_context = self.enricher.format(rag_context, ContextFormat::Detailed);

        match request.spread_type {
            SpreadType::CelticCross => {
                let engine = ParallelReadingEngine::new(
                    orchestrator.clone(),
                    self.prompts.clone(),
                    self.allocator.clone(),
                    SpreadType::CelticCross,
                )?;
                engine
                    .generate_reading(
                        drawn_cards,
                        &request.question,
                        request.category.as_deref(),
                        Some(&formatted_context),
                    )
                    .await
            }
            spread => {
                let engine = ReadingEngine::new(
                    orchestrator.clone(),
                    self.prompts.clone(),
                    self.allocator.clone(),
                );
                engine
                    .generate_with_hook(
                        drawn_cards,
                        &request.question,
                        spread,
                        request.category.as_deref(),
                        Some(&formatted_context),
                        |retry| {
                            let event = SseEvent::progress(
                                ReadingStage::GeneratingAi,
                                60 + (retry * 5) as u8,
                                format!("AI 리딩 재생성 중... (시도 {})", retry + 1),
                            );
                            let _ = tx.try_send(event.to_sse());
                        },
                    )
                    .await
            }
        }
    }

    /// Fire-and-forget persistence. Failures are logged only; the reading
    /// has already been delivered. The handle is retained so the task is
    /// not dropped mid-write.
    fn schedule_persistence(&self, reading: PersistedReading) {
        let db = self.db.clone();
        let reading_id = reading.id.clone();
        let handle = tokio::spawn(async move {
            match db.create_reading(&reading).await {
                Ok(_) => {
                    tracing::info!(%reading_id, "background reading persistence complete");
                }
                Err(e) => {
                    tracing::error!(%reading_id, error = %e, "background reading persistence failed");
                }
            }
        });

        let mut tasks = self.persistence_tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }
}

fn build_cards_payload(drawn_cards: &[DrawnCard], reading: &ReadingResponse) -> Vec<PersistedCard> {
    reading
        .cards
        .iter()
        .zip(drawn_cards)
        .map(|(interp, drawn)| PersistedCard {
            card_id: drawn.card.id,
            position: interp.position.clone(),
            orientation: drawn.orientation,
            interpretation: interp.interpretation.clone(),
            key_message: interp.key_message.clone(),
            card_snapshot: drawn.card.clone(),
        })
        .collect()
}

/// Flatten the call history into usage-log rows. Within one orchestrator
/// call, every attempt before the successful last one was a provider
/// retry/fallback.
fn build_usage_logs(calls: &[LlmCall]) -> Vec<LlmUsageLog> {
    let mut logs = Vec::new();
    for call in calls {
        let last = call.response.all_attempts.len().saturating_sub(1);
        for (index, attempt) in call.response.all_attempts.iter().enumerate() {
            logs.push(LlmUsageLog {
                provider: attempt.provider.clone(),
                model: attempt.model.clone(),
                prompt_tokens: attempt.prompt_tokens,
                completion_tokens: attempt.completion_tokens,
                total_tokens: attempt.total_tokens,
                estimated_cost: attempt.estimated_cost,
                latency_seconds: attempt.latency_ms as f64 / 1000.0,
                purpose: if index == last {
                    call.purpose
                } else {
                    UsagePurpose::Retry
                },
                created_at: attempt.created_at,
            });
        }
    }
    tracing::info!(count = logs.len(), "built LLM usage logs");
    logs
}
