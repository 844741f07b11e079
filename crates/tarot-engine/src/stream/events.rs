//! Typed SSE events. Each event serializes as
//! `event: <name>\ndata: <json>\n\n`; the set of names is fixed by the
//! wire contract with the client.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingStage {
    Initializing,
    DrawingCards,
    EnrichingContext,
    GeneratingAi,
    Finalizing,
    Completed,
}

impl ReadingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::DrawingCards => "drawing_cards",
            Self::EnrichingContext => "enriching_context",
            Self::GeneratingAi => "generating_ai",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SseEvent {
    Started {
        message: String,
    },
    Progress {
        stage: ReadingStage,
        progress: u8,
        message: String,
        detail: Option<String>,
    },
    CardDrawn {
        card_id: u32,
        card_name: String,
        card_name_ko: String,
        position: String,
        is_reversed: bool,
        progress: u8,
    },
    RagEnrichment {
        cards_enriched: usize,
        spread_context_loaded: bool,
        category_context_loaded: bool,
    },
    AiGeneration {
        provider: String,
        model: String,
        message: String,
    },
    SectionComplete {
        section: &'static str,
        data: Value,
        progress: u8,
    },
    Complete {
        reading_id: String,
        total_time: f64,
        reading_summary: Value,
    },
    Error {
        error_type: String,
        message: String,
        details: String,
        stage: ReadingStage,
    },
}

impl SseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::CardDrawn { .. } => "card_drawn",
            Self::RagEnrichment { .. } => "rag_enrichment",
            Self::AiGeneration { .. } => "ai_generation",
            Self::SectionComplete { .. } => "section_complete",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    fn data(&self) -> Value {
        match self {
            Self::Started { message } => json!({"message": message}),
            Self::Progress {
                stage,
                progress,
                message,
                detail,
            } => json!({
                "stage": stage.as_str(),
                "progress": progress,
                "message": message,
                "detail": detail,
            }),
            Self::CardDrawn {
                card_id,
                card_name,
                card_name_ko,
                position,
                is_reversed,
                progress,
            } => json!({
                "card_id": card_id,
                "card_name": card_name,
                "card_name_ko": card_name_ko,
                "position": position,
                "is_reversed": is_reversed,
                "progress": progress,
            }),
            Self::RagEnrichment {
                cards_enriched,
                spread_context_loaded,
                category_context_loaded,
            } => json!({
                "cards_enriched": cards_enriched,
                "spread_context_loaded": spread_context_loaded,
                "category_context_loaded": category_context_loaded,
            }),
            Self::AiGeneration {
                provider,
                model,
                message,
            } => json!({
                "provider": provider,
                "model": model,
                "message": message,
            }),
            Self::SectionComplete {
                section,
                data,
                progress,
            } => json!({
                "section": section,
                "data": data,
                "progress": progress,
            }),
            Self::Complete {
                reading_id,
                total_time,
                reading_summary,
            } => json!({
                "reading_id": reading_id,
                "total_time": total_time,
                "reading_summary": reading_summary,
            }),
            Self::Error {
                error_type,
                message,
                details,
                stage,
            } => json!({
                "error_type": error_type,
                "message": message,
                "details": details,
                "stage": stage.as_str(),
            }),
        }
    }

    /// Wire format: `event: <name>\ndata: <json>\n\n`.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.data())
    }

    pub fn progress(stage: ReadingStage, progress: u8, message: impl Into<String>) -> Self {
        Self::Progress {
            stage,
            progress,
            message: message.into(),
            detail: None,
        }
    }
}

/// Lazy sequence of SSE-formatted strings backed by a channel. The producer
/// runs in its own task and the stream ends when it drops the sender.
pub struct EventStream {
    receiver: mpsc::Receiver<String>,
}

impl EventStream {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver }
    }

    pub async fn next(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Drain the remaining events into a vector.
    pub async fn collect(mut self) -> Vec<String> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
