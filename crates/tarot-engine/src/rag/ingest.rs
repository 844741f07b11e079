//! One-time ingest of the knowledge base into the vector store. The store
//! is append-only during normal operation; this pipeline runs at setup and
//! again after a schema or embedding-model change (after a `clear()`).

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use super::knowledge_base::{CardKnowledge, KnowledgeBase};
use super::vector_store::VectorStore;

const COMBINATION_FILES: &[&str] = &["major_pairs.json"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub cards: usize,
    pub spreads: usize,
    pub combinations: usize,
    pub categories: usize,
}

impl IngestStats {
    pub fn total(&self) -> usize {
        self.cards + self.spreads + self.combinations + self.categories
    }
}

pub struct KnowledgeIndexer {
    knowledge_base: Arc<KnowledgeBase>,
    store: Arc<VectorStore>,
}

impl KnowledgeIndexer {
    pub fn new(knowledge_base: Arc<KnowledgeBase>, store: Arc<VectorStore>) -> Self {
        Self {
            knowledge_base,
            store,
        }
    }

    /// Index every knowledge record. When the collection already holds
    /// documents and `force` is false, ingest is skipped so restarts do not
    /// duplicate the corpus.
    pub async fn index_all(&self, force: bool) -> Result<IngestStats> {
        let existing = self.store.count().await?;
        if existing > 0 && !force {
            tracing::info!(existing, "vector store already populated, skipping ingest");
            return Ok(IngestStats::default());
        }

        let mut stats = IngestStats::default();
        stats.cards = self.index_cards().await?;
        stats.spreads = self.index_spreads().await?;
        stats.combinations = self.index_combinations().await?;
        stats.categories = self.index_categories().await?;

        tracing::info!(
            cards = stats.cards,
            spreads = stats.spreads,
            combinations = stats.combinations,
            categories = stats.categories,
            "knowledge base ingest complete"
        );
        Ok(stats)
    }

    async fn index_cards(&self) -> Result<usize> {
        let cards = self.knowledge_base.all_cards();
        if cards.is_empty() {
            tracing::warn!("no cards found in knowledge base");
            return Ok(0);
        }

        let mut documents = Vec::new();
        let mut metadatas = Vec::new();
        let mut ids = Vec::new();
        for card in &cards {
            documents.push(card_document(card));
            metadatas.push(json!({"type": "card", "card_id": card.id, "name": card.name}));
            ids.push(format!("card_{}_meaning", card.id));
        }

        self.store.add(&documents, &metadatas, &ids).await?;
        Ok(documents.len())
    }

    async fn index_spreads(&self) -> Result<usize> {
        let spreads = self.knowledge_base.all_spreads();
        if spreads.is_empty() {
            return Ok(0);
        }

        let mut documents = Vec::new();
        let mut metadatas = Vec::new();
        let mut ids = Vec::new();
        for spread in &spreads {
            let mut text = format!("{}: {}", spread.name, spread.description);
            if !spread.interpretation_guide.is_empty() {
                text.push(' ');
                text.push_str(&spread.interpretation_guide);
            }
            documents.push(text);
            metadatas.push(json!({"type": "spread", "spread_id": spread.id}));
            ids.push(format!("spread_{}", spread.id));
        }

        self.store.add(&documents, &metadatas, &ids).await?;
        Ok(documents.len())
    }

    async fn index_combinations(&self) -> Result<usize> {
        let mut documents = Vec::new();
        let mut metadatas: Vec<Value> = Vec::new();
        let mut ids = Vec::new();

        for file in COMBINATION_FILES {
            let Some(set) = self.knowledge_base.load_combinations(file) else {
                continue;
            };
            for (index, combo) in set.combinations.iter().enumerate() {
                documents.push(format!("{}: {}", combo.cards.join(" and "), combo.meaning));
                metadatas.push(json!({
                    "type": "combination",
                    "card_ids": combo.card_ids,
                }));
                ids.push(format!(
                    "combination_{}_{}",
                    file.trim_end_matches(".json"),
                    index
                ));
            }
        }

        if documents.is_empty() {
            return Ok(0);
        }
        self.store.add(&documents, &metadatas, &ids).await?;
        Ok(documents.len())
    }

    async fn index_categories(&self) -> Result<usize> {
        let mut documents = Vec::new();
        let mut metadatas = Vec::new();
        let mut ids = Vec::new();

        for key in self.knowledge_base.all_categories() {
            let Some(category) = self.knowledge_base.load_category(&key) else {
                continue;
            };
            documents.push(format!(
                "{} readings focus on: {}",
                category.category,
                category.interpretation_focus.join(", ")
            ));
            metadatas.push(json!({"type": "category", "category": category.category}));
            ids.push(format!("category_{}", category.category));
        }

        if documents.is_empty() {
            return Ok(0);
        }
        self.store.add(&documents, &metadatas, &ids).await?;
        Ok(documents.len())
    }
}

/// Flatten a card record into one searchable passage.
fn card_document(card: &CardKnowledge) -> String {
    let mut text = format!("{} ({}): {}", card.name, card.name_ko, card.deep_meaning);
    if !card.upright_themes.is_empty() {
        text.push_str(&format!(" Upright themes: {}.", card.upright_themes.join(", ")));
    }
    if !card.reversed_themes.is_empty() {
        text.push_str(&format!(
            " Reversed themes: {}.",
            card.reversed_themes.join(", ")
        ));
    }
    if !card.symbolism.is_empty() {
        let mut symbols: Vec<(&String, &String)> = card.symbolism.iter().collect();
        symbols.sort();
        let rendered: Vec<String> = symbols
            .iter()
            .map(|(symbol, meaning)| format!("{symbol} ({meaning})"))
            .collect();
        text.push_str(&format!(" Symbols: {}.", rendered.join(", ")));
    }
    text
}
