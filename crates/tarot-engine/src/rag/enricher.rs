//! Combines the retrieval families into one fixed-shape context for prompt
//! templates. All families run concurrently; a failed family leaves its
//! section empty rather than failing the enrichment.

use std::sync::Arc;

use serde::Serialize;

use super::retriever::{CategoryContext, CombinationContext, Retriever, SpreadContext};
use crate::types::DrawnCard;

const CARD_SNIPPETS_K: usize = 2;
const SPREAD_SNIPPETS_K: usize = 2;
const COMBINATION_SNIPPETS_K: usize = 2;
const CATEGORY_SNIPPETS_K: usize = 3;
const GENERAL_SNIPPETS_K: usize = 3;

/// Card identity as the enricher needs it.
#[derive(Debug, Clone, Copy)]
pub struct CardRef {
    pub id: u32,
    pub is_reversed: bool,
}

impl From<&DrawnCard> for CardRef {
    fn from(drawn: &DrawnCard) -> Self {
        Self {
            id: drawn.card.id,
            is_reversed: drawn.is_reversed(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichedCard {
    pub card_id: u32,
    pub is_reversed: bool,
    pub card: Option<super::knowledge_base::CardKnowledge>,
    pub snippets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentMetadata {
    pub language: String,
    pub question: String,
    pub spread_type: String,
    pub category: Option<String>,
    pub num_cards: usize,
}

#[derive(Debug, Clone)]
pub struct EnrichedContext {
    pub cards_context: Vec<EnrichedCard>,
    pub spread_context: SpreadContext,
    pub combination_context: CombinationContext,
    pub category_context: CategoryContext,
    pub general_insights: Vec<String>,
    pub metadata: EnrichmentMetadata,
}

/// Rendering style for prompt inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFormat {
    Detailed,
    Concise,
    Symbolic,
}

pub struct ContextEnricher {
    retriever: Arc<Retriever>,
}

impl ContextEnricher {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        tracing::info!("context enricher initialized");
        Self { retriever }
    }

    /// Run all retrieval families concurrently and assemble the context.
    pub async fn enrich(
        &self,
        cards: &[CardRef],
        spread_type: &str,
        question: &str,
        category: Option<&str>,
        language: &str,
    ) -> EnrichedContext {
        let card_ids: Vec<u32> = cards.iter().map(|c| c.id).collect();
        tracing::debug!(cards = cards.len(), spread_type, "starting parallel retrieval");

        let card_futures = futures::future::join_all(cards.iter().map(|card| {
            self.retriever
                .retrieve_card_context(card.id, question, CARD_SNIPPETS_K)
        }));
        let spread_future = self
            .retriever
            .retrieve_spread_context(spread_type, SPREAD_SNIPPETS_K);
        let combination_future = async {
            if card_ids.len() > 1 {
                self.retriever
                    .retrieve_combination_context(&card_ids, COMBINATION_SNIPPETS_K)
                    .await
            } else {
                CombinationContext::default()
            }
        };
        let category_future = async {
            match category {
                Some(category) => {
                    self.retriever
                        .retrieve_category_context(category, &card_ids, CATEGORY_SNIPPETS_K)
                        .await
                }
                None => CategoryContext::default(),
            }
        };
        let general_future = self
            .retriever
            .retrieve_general_context(question, GENERAL_SNIPPETS_K);

        let (card_contexts, spread_context, combination_context, category_context, general) = tokio::join!(
            card_futures,
            spread_future,
            combination_future,
            category_future,
            general_future
        );

        let cards_context = cards
            .iter()
            .zip(card_contexts)
            .map(|(card, context)| EnrichedCard {
                card_id: card.id,
                is_reversed: card.is_reversed,
                card: context.card,
                snippets: context.snippets,
            })
            .collect();

        tracing::info!(cards = cards.len(), "context enrichment complete");

        EnrichedContext {
            cards_context,
            spread_context,
            combination_context,
            category_context,
            general_insights: general.documents,
            metadata: EnrichmentMetadata {
                language: language.to_string(),
                question: question.to_string(),
                spread_type: spread_type.to_string(),
                category: category.map(str::to_string),
                num_cards: cards.len(),
            },
        }
    }

    /// Render the context for prompt injection.
    pub fn format(&self, context: &EnrichedContext, format: ContextFormat) -> String {
        match format {
            ContextFormat::Detailed => format_detailed(context),
            ContextFormat::Concise => format_concise(context),
            ContextFormat::Symbolic => format_symbolic(context),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn format_detailed(context: &EnrichedContext) -> String {
    let mut lines = vec!["=== ENRICHED TAROT READING CONTEXT ===".to_string(), String::new()];

    lines.push("CARD KNOWLEDGE:".to_string());
    for (i, card_ctx) in context.cards_context.iter().enumerate() {
        let orientation = if card_ctx.is_reversed {
            " (Reversed)"
        } else {
            " (Upright)"
        };
        let name = card_ctx
            .card
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or("Unknown");
        lines.push(String::new());
        lines.push(format!("Card {}: {}{}", i + 1, name, orientation));
        if let Some(card) = &card_ctx.card {
            lines.push(format!(
                "  - Deep meaning: {}...",
                truncate(&card.deep_meaning, 200)
            ));
            let themes = if card_ctx.is_reversed {
                &card.reversed_themes
            } else {
                &card.upright_themes
            };
            if !themes.is_empty() {
                let shown: Vec<&str> = themes.iter().take(5).map(String::as_str).collect();
                lines.push(format!("  - Key themes: {}", shown.join(", ")));
            }
        }
    }

    if let Some(spread) = &context.spread_context.spread {
        lines.push(String::new());
        lines.push(format!("SPREAD PATTERN: {}", spread.name));
        lines.push(format!("  - {}", spread.description));
    }

    if !context.combination_context.combinations.is_empty() {
        lines.push(String::new());
        lines.push("CARD COMBINATIONS:".to_string());
        for combo in context.combination_context.combinations.iter().take(3) {
            lines.push(format!(
                "  - {}: {}",
                combo.cards.join(", "),
                truncate(&combo.meaning, 150)
            ));
        }
    }

    if let Some(category) = &context.category_context.category {
        lines.push(String::new());
        lines.push(format!("CATEGORY FOCUS: {}", category.category));
        if !category.interpretation_focus.is_empty() {
            let focus: Vec<&str> = category
                .interpretation_focus
                .iter()
                .take(3)
                .map(String::as_str)
                .collect();
            lines.push(format!("  - Focus areas: {}", focus.join(", ")));
        }
    }

    if !context.general_insights.is_empty() {
        lines.push(String::new());
        lines.push("RELEVANT INSIGHTS:".to_string());
        for insight in context.general_insights.iter().take(3) {
            lines.push(format!("  - {}...", truncate(insight, 150)));
        }
    }

    lines.join("\n")
}

fn format_concise(context: &EnrichedContext) -> String {
    let mut parts = Vec::new();
    for card_ctx in &context.cards_context {
        if let Some(card) = &card_ctx.card {
            parts.push(format!(
                "{}: {}",
                card.name,
                truncate(&card.deep_meaning, 100)
            ));
        }
    }
    if let Some(spread) = &context.spread_context.spread {
        parts.push(format!("Spread: {}", truncate(&spread.description, 100)));
    }
    parts.join(" | ")
}

fn format_symbolic(context: &EnrichedContext) -> String {
    let mut lines = vec!["SYMBOLIC ANALYSIS:".to_string(), String::new()];
    for (i, card_ctx) in context.cards_context.iter().enumerate() {
        let name = card_ctx
            .card
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or("Unknown");
        lines.push(format!("Card {} - {}:", i + 1, name));
        if let Some(card) = &card_ctx.card {
            if !card.symbolism.is_empty() {
                lines.push("  Symbols:".to_string());
                let mut symbols: Vec<(&String, &String)> = card.symbolism.iter().collect();
                symbols.sort();
                for (symbol, meaning) in symbols.into_iter().take(3) {
                    lines.push(format!("    - {symbol}: {meaning}"));
                }
            }
            if let Some(astro) = &card.astrological_association {
                lines.push(format!("  Astrological: {astro}"));
            }
            if let Some(element) = &card.element {
                lines.push(format!("  Element: {element}"));
            }
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::knowledge_base::KnowledgeBase;
    use crate::rag::test_support::HashEmbedder;
    use crate::rag::vector_store::VectorStore;
    use serde_json::json;

    async fn enricher_fixture() -> (tempfile::TempDir, tempfile::TempDir, ContextEnricher) {
        let store_dir = tempfile::tempdir().unwrap();
        let kb_dir = tempfile::tempdir().unwrap();

        let major = kb_dir.path().join("cards/major_arcana");
        std::fs::create_dir_all(&major).unwrap();
        std::fs::write(
            major.join("00_the_fool.json"),
            json!({
                "id": 0,
                "name": "The Fool",
                "name_ko": "바보",
                "deep_meaning": "New beginnings, optimism, trust in the path ahead.",
                "upright_themes": ["adventure", "innocence"],
                "symbolism": {"white rose": "purity", "cliff": "leap of faith"},
                "element": "Air"
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            major.join("01_the_magician.json"),
            json!({"id": 1, "name": "The Magician", "name_ko": "마법사", "deep_meaning": "Willpower."})
                .to_string(),
        )
        .unwrap();
        let spreads = kb_dir.path().join("spreads");
        std::fs::create_dir_all(&spreads).unwrap();
        std::fs::write(
            spreads.join("one_card.json"),
            json!({"id": "one_card", "name": "One Card Reading", "description": "direct insight"})
                .to_string(),
        )
        .unwrap();

        let store = Arc::new(
            VectorStore::new(
                store_dir.path().to_str().unwrap(),
                Arc::new(HashEmbedder::new()),
            )
            .await
            .unwrap(),
        );
        store
            .add(
                &["Trust the journey even without a map".to_string()],
                &[json!({"type": "card", "card_id": 0})],
                &["fool_trust".to_string()],
            )
            .await
            .unwrap();

        let retriever = Arc::new(Retriever::new(
            store,
            Arc::new(KnowledgeBase::new(kb_dir.path())),
        ));
        (store_dir, kb_dir, ContextEnricher::new(retriever))
    }

    #[tokio::test]
    async fn enrich_has_fixed_shape() {
        let (_s, _k, enricher) = enricher_fixture().await;
        let cards = [CardRef {
            id: 0,
            is_reversed: false,
        }];
        let context = enricher
            .enrich(&cards, "one_card", "What should I focus on today?", Some("career"), "ko")
            .await;

        assert_eq!(context.cards_context.len(), 1);
        assert_eq!(context.cards_context[0].card_id, 0);
        assert!(context.spread_context.spread.is_some());
        // Single card: combination section stays empty by design.
        assert!(context.combination_context.combinations.is_empty());
        // Unknown category degrades to an empty section, not a failure.
        assert!(context.category_context.category.is_none());
        assert_eq!(context.metadata.num_cards, 1);
        assert_eq!(context.metadata.language, "ko");
    }

    #[tokio::test]
    async fn failed_family_leaves_only_that_section_empty() {
        let (_s, _k, enricher) = enricher_fixture().await;
        // Card 42 has no KB record: its section is empty, others survive.
        let cards = [
            CardRef {
                id: 0,
                is_reversed: false,
            },
            CardRef {
                id: 42,
                is_reversed: true,
            },
        ];
        let context = enricher
            .enrich(&cards, "one_card", "question", None, "en")
            .await;
        assert!(context.cards_context[0].card.is_some());
        assert!(context.cards_context[1].card.is_none());
        assert!(context.spread_context.spread.is_some());
    }

    #[tokio::test]
    async fn detailed_format_sections() {
        let (_s, _k, enricher) = enricher_fixture().await;
        let cards = [CardRef {
            id: 0,
            is_reversed: false,
        }];
        let context = enricher
            .enrich(&cards, "one_card", "focus", None, "en")
            .await;

        let detailed = enricher.format(&context, ContextFormat::Detailed);
        assert!(detailed.contains("CARD KNOWLEDGE:"));
        assert!(detailed.contains("The Fool (Upright)"));
        assert!(detailed.contains("SPREAD PATTERN: One Card Reading"));

        let concise = enricher.format(&context, ContextFormat::Concise);
        assert!(concise.contains("The Fool:"));
        assert!(concise.len() < detailed.len());

        let symbolic = enricher.format(&context, ContextFormat::Symbolic);
        assert!(symbolic.contains("SYMBOLIC ANALYSIS:"));
        assert!(symbolic.contains("Element: Air"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("한국어 텍스트", 3), "한국어");
        assert_eq!(truncate("short", 100), "short");
    }
}
