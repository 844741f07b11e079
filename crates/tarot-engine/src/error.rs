//! Engine-level error taxonomy shared by the parsing, validation, and
//! reading layers. Provider-level failures live in [`crate::llm::AiError`]
//! and are wrapped transparently.

use thiserror::Error;

use crate::llm::AiError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ai(#[from] AiError),

    /// The LLM output did not contain parseable JSON. `truncated` marks
    /// failures that look like the output budget ran out, which the reading
    /// engines treat as retryable with a larger `max_tokens`.
    #[error("JSON extraction failed: {message}")]
    JsonExtraction { message: String, truncated: bool },

    /// The parsed reading violates the schema or a quality rule.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("template error: {0}")]
    Template(String),

    /// Store write failed after the reading was already materialized.
    /// Callers log this; it never fails a delivered reading.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn truncation(message: impl Into<String>) -> Self {
        Self::JsonExtraction {
            message: message.into(),
            truncated: true,
        }
    }

    /// Whether the reading engine may retry this failure with a larger
    /// output budget.
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::JsonExtraction { truncated: true, .. })
    }

    /// Stable identifier used in SSE error events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ai(e) => e.kind(),
            Self::JsonExtraction { .. } => "JSONExtractionError",
            Self::Validation(_) => "ValidationError",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Template(_) => "TemplateError",
            Self::Persistence(_) => "PersistenceError",
        }
    }
}
