//! File-backed prompt composition: persona, per-spread reading prompt, and
//! the structured-output instructions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use super::context_builder::build_card_context;
use super::template::Template;
use crate::error::EngineError;
use crate::reading::SpreadType;
use crate::types::DrawnCard;

/// The fixed template set, addressed relative to the prompts directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    System,
    OneCard,
    ThreeCardPastPresentFuture,
    ThreeCardSituationActionOutcome,
    OutputFormat,
    CelticCardBatch,
    CelticOverall,
    CelticRelationships,
    CelticAdvice,
}

impl PromptKind {
    pub fn path(&self) -> &'static str {
        match self {
            Self::System => "system/tarot_expert.txt",
            Self::OneCard => "reading/one_card.txt",
            Self::ThreeCardPastPresentFuture => "reading/three_card_past_present_future.txt",
            Self::ThreeCardSituationActionOutcome => {
                "reading/three_card_situation_action_outcome.txt"
            }
            Self::OutputFormat => "output/structured_response.txt",
            Self::CelticCardBatch => "reading/celtic_card_batch.txt",
            Self::CelticOverall => "reading/celtic_overall.txt",
            Self::CelticRelationships => "reading/celtic_relationships.txt",
            Self::CelticAdvice => "reading/celtic_advice.txt",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FullPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
}

pub struct PromptEngine {
    prompts_dir: PathBuf,
    cache: Mutex<HashMap<PromptKind, Arc<Template>>>,
}

impl PromptEngine {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let prompts_dir = prompts_dir.into();
        if !prompts_dir.exists() {
            return Err(EngineError::Template(format!(
                "prompts directory not found: {}",
                prompts_dir.display()
            )));
        }
        tracing::info!(dir = %prompts_dir.display(), "prompt engine initialized");
        Ok(Self {
            prompts_dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    pub fn load(&self, kind: PromptKind) -> Result<Arc<Template>, EngineError> {
        if let Some(template) = self.cache.lock().get(&kind) {
            return Ok(template.clone());
        }
        let path = self.prompts_dir.join(kind.path());
        let source = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::Template(format!("template not found: {} ({e})", path.display()))
        })?;
        let template = Arc::new(Template::parse(&source)?);
        self.cache.lock().insert(kind, template.clone());
        tracing::debug!(template = kind.path(), "loaded template");
        Ok(template)
    }

    pub fn render_system_prompt(&self) -> Result<String, EngineError> {
        Ok(self.load(PromptKind::System)?.render(&json!({})))
    }

    pub fn render_output_format(&self) -> Result<String, EngineError> {
        Ok(self.load(PromptKind::OutputFormat)?.render(&json!({})))
    }

    /// Compose the full prompt pair for a single-call reading. Card count
    /// is validated against the spread.
    pub fn build_full_prompt(
        &self,
        question: &str,
        cards: &[DrawnCard],
        spread_type: SpreadType,
        category: Option<&str>,
        user_context: Option<&str>,
        include_system_prompt: bool,
        include_output_format: bool,
    ) -> Result<FullPrompt, EngineError> {
        let expected = spread_type.card_count();
        if cards.len() != expected {
            return Err(EngineError::InvalidInput(format!(
                "{} reading requires exactly {} cards, got {}",
                spread_type.as_str(),
                expected,
                cards.len()
            )));
        }

        let system_prompt = if include_system_prompt {
            self.render_system_prompt()?
        } else {
            String::new()
        };

        let reading_prompt = match spread_type {
            SpreadType::OneCard => {
                let context = json!({
                    "question": question,
                    "card": build_card_context(&cards[0]),
                    "category": category,
                    "user_context": user_context,
                });
                self.load(PromptKind::OneCard)?.render(&context)
            }
            SpreadType::ThreeCardPastPresentFuture | SpreadType::ThreeCardSituationActionOutcome => {
                let kind = if spread_type == SpreadType::ThreeCardPastPresentFuture {
                    PromptKind::ThreeCardPastPresentFuture
                } else {
                    PromptKind::ThreeCardSituationActionOutcome
                };
                let context = json!({
                    "question": question,
                    "cards": cards.iter().map(build_card_context).collect::<Vec<_>>(),
                    "category": category,
                    "user_context": user_context,
                });
                self.load(kind)?.render(&context)
            }
            SpreadType::CelticCross => {
                return Err(EngineError::InvalidInput(
                    "celtic cross readings go through the parallel engine".into(),
                ))
            }
        };

        let user_prompt = if include_output_format {
            format!("{}\n\n{}", reading_prompt, self.render_output_format()?)
        } else {
            reading_prompt
        };

        tracing::info!(
            spread = spread_type.as_str(),
            system = include_system_prompt,
            format = include_output_format,
            "built full prompt"
        );

        Ok(FullPrompt {
            system_prompt,
            user_prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Arcana, Card, Orientation};

    fn engine() -> PromptEngine {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("prompts");
        PromptEngine::new(dir).unwrap()
    }

    fn fool(orientation: Orientation) -> DrawnCard {
        DrawnCard::new(
            Card {
                id: 0,
                name: "The Fool".into(),
                name_ko: "바보".into(),
                arcana: Arcana::Major,
                suit: None,
                number: Some(0),
                keywords_upright: vec!["beginnings".into()],
                keywords_reversed: vec!["recklessness".into()],
                meaning_upright: "A leap of faith.".into(),
                meaning_reversed: "Hesitation.".into(),
                description: None,
                symbolism: None,
                image_url: None,
            },
            orientation,
        )
    }

    #[test]
    fn missing_dir_fails_construction() {
        assert!(PromptEngine::new("/nonexistent/prompts").is_err());
    }

    #[test]
    fn one_card_prompt_contains_question_and_card() {
        let engine = engine();
        let prompt = engine
            .build_full_prompt(
                "오늘 무엇에 집중해야 할까요?",
                &[fool(Orientation::Upright)],
                SpreadType::OneCard,
                Some("career"),
                None,
                true,
                true,
            )
            .unwrap();
        assert!(!prompt.system_prompt.is_empty());
        assert!(prompt.user_prompt.contains("오늘 무엇에 집중해야 할까요?"));
        assert!(prompt.user_prompt.contains("The Fool"));
        assert!(prompt.user_prompt.contains("정방향"));
        // Output format instructions appended at the end.
        assert!(prompt.user_prompt.contains("overall_reading"));
    }

    #[test]
    fn card_count_validated_per_spread() {
        let engine = engine();
        let err = engine
            .build_full_prompt(
                "q",
                &[fool(Orientation::Upright)],
                SpreadType::ThreeCardPastPresentFuture,
                None,
                None,
                true,
                true,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn system_and_format_are_optional() {
        let engine = engine();
        let prompt = engine
            .build_full_prompt(
                "question",
                &[fool(Orientation::Reversed)],
                SpreadType::OneCard,
                None,
                None,
                false,
                false,
            )
            .unwrap();
        assert!(prompt.system_prompt.is_empty());
        assert!(!prompt.user_prompt.contains("JSON"));
    }

    #[test]
    fn three_card_uses_all_cards() {
        let engine = engine();
        let cards = vec![
            fool(Orientation::Upright),
            fool(Orientation::Reversed),
            fool(Orientation::Upright),
        ];
        let prompt = engine
            .build_full_prompt(
                "흐름이 궁금해요",
                &cards,
                SpreadType::ThreeCardPastPresentFuture,
                None,
                None,
                true,
                false,
            )
            .unwrap();
        assert!(prompt.user_prompt.matches("The Fool").count() >= 3);
    }
}
