//! High-level retrieval over the knowledge base and vector store. Each
//! family degrades to an empty context on failure; retrieval problems must
//! never sink a reading.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::cache::{CachedContext, RagCache, RagCacheStats};
use super::knowledge_base::{
    CardKnowledge, CategoryCardMeaning, CategoryKnowledge, Combination, KnowledgeBase,
    SpreadKnowledge,
};
use super::vector_store::{MetadataFilter, RetrievalResult, VectorStore};

const DEFAULT_COMBINATION_FILE: &str = "major_pairs.json";

#[derive(Debug, Clone, Default)]
pub struct CardContext {
    pub card: Option<CardKnowledge>,
    pub snippets: Vec<String>,
    pub sources: Vec<JsonValue>,
}

#[derive(Debug, Clone, Default)]
pub struct SpreadContext {
    pub spread: Option<SpreadKnowledge>,
    pub snippets: Vec<String>,
    pub sources: Vec<JsonValue>,
}

#[derive(Debug, Clone, Default)]
pub struct CombinationContext {
    pub combinations: Vec<Combination>,
    pub snippets: Vec<String>,
    pub sources: Vec<JsonValue>,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryContext {
    pub category: Option<CategoryKnowledge>,
    pub card_meanings: HashMap<u32, CategoryCardMeaning>,
    pub snippets: Vec<String>,
}

pub struct Retriever {
    store: Arc<VectorStore>,
    knowledge_base: Arc<KnowledgeBase>,
    cache: Option<Arc<RagCache>>,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, knowledge_base: Arc<KnowledgeBase>) -> Self {
        Self::with_cache(store, knowledge_base, Some(Arc::new(RagCache::default())))
    }

    pub fn with_cache(
        store: Arc<VectorStore>,
        knowledge_base: Arc<KnowledgeBase>,
        cache: Option<Arc<RagCache>>,
    ) -> Self {
        tracing::info!(
            caching = cache.is_some(),
            "retriever initialized"
        );
        Self {
            store,
            knowledge_base,
            cache,
        }
    }

    /// KB record for one card plus the top-k snippets scoped to it.
    pub async fn retrieve_card_context(&self, card_id: u32, query: &str, k: usize) -> CardContext {
        let cache_key = RagCache::key("card", query, k, &[&card_id.to_string()]);
        if let Some(cache) = &self.cache {
            if let Some(CachedContext::Card(cached)) = cache.get(&cache_key) {
                return cached;
            }
        }

        let mut context = CardContext::default();
        context.card = self.knowledge_base.load_card(card_id);
        if context.card.is_none() {
            tracing::warn!(card_id, "no card data found");
            return context;
        }

        match self
            .store
            .search(query, k, Some(&MetadataFilter::card(card_id as i64)))
            .await
        {
            Ok(results) => {
                context.snippets = results.documents;
                context.sources = results.metadatas;
            }
            Err(e) => {
                tracing::error!(card_id, error = %e, "card context search failed");
            }
        }

        if let Some(cache) = &self.cache {
            cache.set(cache_key, CachedContext::Card(context.clone()));
        }
        context
    }

    /// Spread record plus interpretation snippets.
    pub async fn retrieve_spread_context(&self, spread_key: &str, k: usize) -> SpreadContext {
        let cache_key = RagCache::key("spread", spread_key, k, &[]);
        if let Some(cache) = &self.cache {
            if let Some(CachedContext::Spread(cached)) = cache.get(&cache_key) {
                return cached;
            }
        }

        let mut context = SpreadContext::default();
        context.spread = self.knowledge_base.load_spread(spread_key);
        let Some(spread) = &context.spread else {
            tracing::warn!(spread_key, "no spread data found");
            return context;
        };

        let query = format!("How to interpret {} spread", spread.name);
        let filter = MetadataFilter {
            doc_type: Some("spread".into()),
            spread_id: Some(spread_key.to_string()),
            ..Default::default()
        };
        match self.store.search(&query, k, Some(&filter)).await {
            Ok(results) => {
                context.snippets = results.documents;
                context.sources = results.metadatas;
            }
            Err(e) => {
                tracing::error!(spread_key, error = %e, "spread context search failed");
            }
        }

        if let Some(cache) = &self.cache {
            cache.set(cache_key, CachedContext::Spread(context.clone()));
        }
        context
    }

    /// Combinations containing any of the drawn cards, plus free-text hits.
    pub async fn retrieve_combination_context(
        &self,
        card_ids: &[u32],
        k: usize,
    ) -> CombinationContext {
        let mut context = CombinationContext::default();

        let Some(set) = self
            .knowledge_base
            .load_combinations(DEFAULT_COMBINATION_FILE)
        else {
            tracing::warn!("no combination data found");
            return context;
        };
        context.combinations = set
            .combinations
            .into_iter()
            .filter(|combo| combo.card_ids.iter().any(|id| card_ids.contains(id)))
            .collect();

        let names: Vec<String> = card_ids.iter().map(|id| id.to_string()).collect();
        let query = format!("Card combination meaning: {}", names.join(", "));
        match self
            .store
            .search(&query, k, Some(&MetadataFilter::doc_type("combination")))
            .await
        {
            Ok(results) => {
                context.snippets = results.documents;
                context.sources = results.metadatas;
            }
            Err(e) => {
                tracing::error!(error = %e, "combination context search failed");
            }
        }
        tracing::debug!(
            combinations = context.combinations.len(),
            snippets = context.snippets.len(),
            "combination context retrieved"
        );
        context
    }

    /// Category guide plus per-card category meanings.
    pub async fn retrieve_category_context(
        &self,
        category: &str,
        card_ids: &[u32],
        k: usize,
    ) -> CategoryContext {
        let mut context = CategoryContext::default();

        let Some(knowledge) = self.knowledge_base.load_category(category) else {
            tracing::warn!(category, "no category data found");
            return context;
        };
        for &card_id in card_ids {
            if let Some(meaning) = knowledge.card_specific_meanings.get(&card_id.to_string()) {
                context.card_meanings.insert(card_id, meaning.clone());
            }
        }
        context.category = Some(knowledge);

        let query = format!("{category} reading interpretation");
        match self
            .store
            .search(&query, k, Some(&MetadataFilter::category(category)))
            .await
        {
            Ok(results) => context.snippets = results.documents,
            Err(e) => {
                tracing::error!(category, error = %e, "category context search failed");
            }
        }
        context
    }

    /// Unscoped top-k snippets against the question.
    pub async fn retrieve_general_context(&self, query: &str, k: usize) -> RetrievalResult {
        let cache_key = RagCache::key("general", query, k, &[]);
        if let Some(cache) = &self.cache {
            if let Some(CachedContext::General(cached)) = cache.get(&cache_key) {
                return cached;
            }
        }

        let results = match self.store.search(query, k, None).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(error = %e, "general context search failed");
                RetrievalResult::default()
            }
        };

        if let Some(cache) = &self.cache {
            cache.set(cache_key, CachedContext::General(results.clone()));
        }
        results
    }

    pub fn cache_stats(&self) -> Option<RagCacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.as_ref().map(|c| c.clear()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::test_support::HashEmbedder;
    use serde_json::json;

    async fn fixture() -> (tempfile::TempDir, tempfile::TempDir, Retriever) {
        let store_dir = tempfile::tempdir().unwrap();
        let kb_dir = tempfile::tempdir().unwrap();

        let major = kb_dir.path().join("cards/major_arcana");
        std::fs::create_dir_all(&major).unwrap();
        std::fs::write(
            major.join("00_the_fool.json"),
            json!({"id": 0, "name": "The Fool", "name_ko": "바보", "deep_meaning": "beginnings"})
                .to_string(),
        )
        .unwrap();
        let spreads = kb_dir.path().join("spreads");
        std::fs::create_dir_all(&spreads).unwrap();
        std::fs::write(
            spreads.join("one_card.json"),
            json!({"id": "one_card", "name": "One Card Reading", "description": "single insight"})
                .to_string(),
        )
        .unwrap();
        let combos = kb_dir.path().join("combinations");
        std::fs::create_dir_all(&combos).unwrap();
        std::fs::write(
            combos.join("major_pairs.json"),
            json!({"combinations": [
                {"card_ids": [0, 8], "cards": ["The Fool", "Strength"], "meaning": "bold start"},
                {"card_ids": [5, 6], "cards": ["Hierophant", "Lovers"], "meaning": "tradition"}
            ]})
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
                &[
                    "The Fool means trusting new beginnings".to_string(),
                    "One card spreads answer a focused question".to_string(),
                ],
                &[
                    json!({"type": "card", "card_id": 0}),
                    json!({"type": "spread", "spread_id": "one_card"}),
                ],
                &["fool_1".to_string(), "spread_1".to_string()],
            )
            .await
            .unwrap();

        let retriever = Retriever::new(store, Arc::new(KnowledgeBase::new(kb_dir.path())));
        (store_dir, kb_dir, retriever)
    }

    #[tokio::test]
    async fn card_context_combines_kb_and_snippets() {
        let (_s, _k, retriever) = fixture().await;
        let context = retriever
            .retrieve_card_context(0, "new beginnings", 2)
            .await;
        assert_eq!(context.card.as_ref().unwrap().name, "The Fool");
        assert_eq!(context.snippets.len(), 1);
    }

    #[tokio::test]
    async fn missing_card_degrades_to_empty() {
        let (_s, _k, retriever) = fixture().await;
        let context = retriever.retrieve_card_context(7, "anything", 2).await;
        assert!(context.card.is_none());
        assert!(context.snippets.is_empty());
    }

    #[tokio::test]
    async fn repeated_card_query_hits_cache() {
        let (_s, _k, retriever) = fixture().await;
        retriever.retrieve_card_context(0, "beginnings", 2).await;
        retriever.retrieve_card_context(0, "beginnings", 2).await;
        let stats = retriever.cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn combinations_match_any_card_id() {
        let (_s, _k, retriever) = fixture().await;
        let context = retriever.retrieve_combination_context(&[0, 3], 2).await;
        assert_eq!(context.combinations.len(), 1);
        assert_eq!(context.combinations[0].meaning, "bold start");
    }

    #[tokio::test]
    async fn spread_context_loads_record() {
        let (_s, _k, retriever) = fixture().await;
        let context = retriever.retrieve_spread_context("one_card", 2).await;
        assert_eq!(context.spread.unwrap().name, "One Card Reading");
    }

    #[tokio::test]
    async fn general_context_searches_everything() {
        let (_s, _k, retriever) = fixture().await;
        let results = retriever
            .retrieve_general_context("focused question", 5)
            .await;
        assert!(!results.documents.is_empty());
        assert_eq!(retriever.clear_cache(), 1);
    }
}
