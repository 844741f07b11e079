//! Retrieval-augmented context pipeline: embeddings, vector store,
//! knowledge base, retriever, and the context enricher.

pub mod cache;
pub mod embeddings;
pub mod enricher;
pub mod ingest;
pub mod knowledge_base;
pub mod retriever;
pub mod vector_store;

pub use cache::{RagCache, RagCacheStats};
pub use embeddings::{Embedder, EmbeddingConfig, MiniLmEmbeddings};
pub use enricher::{ContextEnricher, ContextFormat, EnrichedCard, EnrichedContext};
pub use ingest::{IngestStats, KnowledgeIndexer};
pub use knowledge_base::{
    CardKnowledge, CategoryKnowledge, Combination, KnowledgeBase, SpreadKnowledge,
};
pub use retriever::{
    CardContext, CategoryContext, CombinationContext, Retriever, SpreadContext,
};
pub use vector_store::{MetadataFilter, RetrievalResult, VectorStore, VectorStoreEntry};
