//! AI orchestration and reading pipeline for a tarot reading service.
//!
//! The crate is organized around four layers:
//!
//! - [`llm`]: provider adapters (OpenAI, Anthropic, Gemini) behind one
//!   trait, a fault-tolerant [`llm::Orchestrator`] with timeouts, retries,
//!   and ordered fallback, a Redis response cache, and the model registry.
//! - [`rag`]: multilingual embeddings, a LanceDB vector store, the
//!   file-backed knowledge base, and the parallel context enricher.
//! - [`reading`]: prompt-driven reading generation: JSON extraction and
//!   validation, the single-call engine for one/three-card spreads, and
//!   the two-phase parallel engine for the Celtic Cross.
//! - [`stream`]: typed SSE events delivering progress to the client while
//!   a reading is generated, with background persistence.
//!
//! The HTTP surface, auth, and the concrete store live with collaborators;
//! this crate exposes the [`db::DatabaseProvider`] and
//! [`config::SettingsSource`] seams they plug into.

pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod rag;
pub mod reading;
pub mod shuffle;
pub mod stream;
pub mod types;

pub use config::{EngineSettings, OrchestratorCell, ProviderSettings, SettingsSource};
pub use db::DatabaseProvider;
pub use error::EngineError;
pub use llm::{
    AiError, AiProvider, AiResponse, CachedOrchestrator, FinishReason, GenerationConfig,
    Orchestrator, OrchestratorResponse, ResponseCache,
};
pub use prompt::{LlmAllocator, PromptEngine};
pub use rag::{ContextEnricher, KnowledgeBase, Retriever, VectorStore};
pub use reading::{
    ParallelReadingEngine, ReadingEngine, ReadingOutcome, ReadingResponse, SpreadType,
};
pub use shuffle::CardShuffleService;
pub use stream::{EventStream, SseEvent, StreamingReadingService};
pub use types::{Card, DrawnCard, Orientation, PersistedReading, ReadingRequest};
