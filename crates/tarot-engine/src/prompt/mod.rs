//! Prompt construction: file-backed templates, card context shaping,
//! prompt analysis, and model/token allocation.

pub mod allocator;
pub mod analyzer;
pub mod context_builder;
pub mod engine;
pub mod template;

pub use allocator::{AllocatedConfig, LlmAllocator};
pub use analyzer::{PromptAnalysis, PromptAnalyzer, TaskType, Urgency};
pub use context_builder::build_card_context;
pub use engine::{FullPrompt, PromptEngine, PromptKind};
pub use template::Template;
