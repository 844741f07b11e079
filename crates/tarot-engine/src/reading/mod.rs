//! The structured reading engine: typed response schema, JSON extraction,
//! quality validation, spread configuration, and the single-call and
//! parallel generation pipelines.

pub mod citation;
pub mod engine;
pub mod parallel;
pub mod parser;
pub mod schemas;
pub mod spread_config;
pub mod validator;

pub use citation::CitationFormatter;
pub use engine::ReadingEngine;
pub use parallel::ParallelReadingEngine;
pub use parser::ResponseParser;
pub use schemas::{Advice, CardInterpretation, ReadingResponse};
pub use spread_config::{spread_config, SpreadConfig, SpreadPosition, SpreadType};
pub use validator::ReadingValidator;

use crate::llm::OrchestratorResponse;
use crate::types::UsagePurpose;

/// One orchestrator call made while producing a reading, labelled with the
/// role it played. Feeds the usage log.
#[derive(Debug, Clone)]
pub struct LlmCall {
    pub purpose: UsagePurpose,
    pub response: OrchestratorResponse,
}

/// A finished reading plus the complete call history behind it.
#[derive(Debug, Clone)]
pub struct ReadingOutcome {
    pub reading: ReadingResponse,
    pub llm_calls: Vec<LlmCall>,
}
