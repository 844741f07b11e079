//! Persistent k-NN collection over LanceDB.
//!
//! Documents are embedded on insert; searches embed the query and run a
//! cosine k-NN with optional metadata equality filters. The table lives in a
//! local directory and is reused across restarts.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use serde_json::Value as JsonValue;

use super::embeddings::Embedder;

const DEFAULT_COLLECTION: &str = "tarot_knowledge";

/// Equality filters over the indexed metadata columns. Unset fields do not
/// constrain the search.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub doc_type: Option<String>,
    pub card_id: Option<i64>,
    pub spread_id: Option<String>,
    pub category: Option<String>,
}

impl MetadataFilter {
    pub fn doc_type(kind: impl Into<String>) -> Self {
        Self {
            doc_type: Some(kind.into()),
            ..Default::default()
        }
    }

    pub fn card(card_id: i64) -> Self {
        Self {
            card_id: Some(card_id),
            ..Default::default()
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Default::default()
        }
    }

    fn predicate(&self) -> Option<String> {
        let escape = |s: &str| s.replace('\'', "''");
        let mut clauses = Vec::new();
        if let Some(kind) = &self.doc_type {
            clauses.push(format!("doc_type = '{}'", escape(kind)));
        }
        if let Some(card_id) = self.card_id {
            clauses.push(format!("card_id = {card_id}"));
        }
        if let Some(spread_id) = &self.spread_id {
            clauses.push(format!("spread_id = '{}'", escape(spread_id)));
        }
        if let Some(category) = &self.category {
            clauses.push(format!("category = '{}'", escape(category)));
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }
}

/// Parallel result lists, each of length ≤ k.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub documents: Vec<String>,
    pub metadatas: Vec<JsonValue>,
    pub distances: Vec<f32>,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VectorStoreEntry {
    pub id: String,
    pub document: String,
    pub metadata: JsonValue,
}

pub struct VectorStore {
    db: lancedb::Connection,
    embedder: Arc<dyn Embedder>,
    table_name: String,
    dimension: usize,
}

impl VectorStore {
    pub async fn new(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::with_collection(path, DEFAULT_COLLECTION, embedder).await
    }

    pub async fn with_collection(
        path: &str,
        collection_name: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let dimension = embedder.dimension();
        let store = Self {
            db,
            embedder,
            table_name: collection_name.to_string(),
            dimension,
        };
        store.ensure_table().await?;
        tracing::info!(
            collection = collection_name,
            dimension,
            count = store.count().await.unwrap_or(0),
            "vector store initialized"
        );
        Ok(store)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("document", DataType::Utf8, false),
            Field::new("doc_type", DataType::Utf8, false),
            Field::new("card_id", DataType::Int64, false),
            Field::new("spread_id", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("metadata_json", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
        ]))
    }

    async fn ensure_table(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.table_name) {
            return Ok(());
        }

        // Create with a seed record carrying the schema, then delete it.
        let schema = self.schema();
        let batch = self.build_batch(
            &["__seed__".to_string()],
            &[String::new()],
            &[JsonValue::Object(Default::default())],
            vec![vec![0.0f32; self.dimension]],
        )?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(&self.table_name, Box::new(batches))
            .execute()
            .await
            .context("Failed to create collection table")?;

        let table = self.db.open_table(&self.table_name).execute().await?;
        table.delete("id = '__seed__'").await.ok();
        Ok(())
    }

    fn build_batch(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[JsonValue],
        vectors: Vec<Vec<f32>>,
    ) -> Result<RecordBatch> {
        let str_field = |meta: &JsonValue, key: &str| -> String {
            meta.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let doc_types: Vec<String> = metadatas.iter().map(|m| str_field(m, "type")).collect();
        let card_ids: Vec<i64> = metadatas
            .iter()
            .map(|m| m.get("card_id").and_then(|v| v.as_i64()).unwrap_or(-1))
            .collect();
        let spread_ids: Vec<String> = metadatas.iter().map(|m| str_field(m, "spread_id")).collect();
        let categories: Vec<String> = metadatas.iter().map(|m| str_field(m, "category")).collect();
        let metadata_jsons: Vec<String> = metadatas
            .iter()
            .map(|m| serde_json::to_string(m).unwrap_or_else(|_| "{}".to_string()))
            .collect();

        let flat: Vec<f32> = vectors.iter().flat_map(|v| v.iter().copied()).collect();
        let values = Float32Array::from(flat);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(
                    ids.iter().map(String::as_str).collect::<Vec<_>>(),
                )) as Arc<dyn Array>,
                Arc::new(StringArray::from(
                    documents.iter().map(String::as_str).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    doc_types.iter().map(String::as_str).collect::<Vec<_>>(),
                )),
                Arc::new(Int64Array::from(card_ids)),
                Arc::new(StringArray::from(
                    spread_ids.iter().map(String::as_str).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    categories.iter().map(String::as_str).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    metadata_jsons.iter().map(String::as_str).collect::<Vec<_>>(),
                )),
                Arc::new(vector_array) as Arc<dyn Array>,
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn embed_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let embedder = self.embedder.clone();
        tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            embedder.encode(&refs)
        })
        .await
        .map_err(|e| anyhow!("embedding task panicked: {e}"))?
    }

    /// Append documents; embeddings are computed internally. All three lists
    /// must be the same length.
    pub async fn add(
        &self,
        documents: &[String],
        metadatas: &[JsonValue],
        ids: &[String],
    ) -> Result<()> {
        if documents.len() != metadatas.len() || documents.len() != ids.len() {
            bail!("documents, metadatas, and ids must have the same length");
        }
        if documents.is_empty() {
            tracing::warn!("no documents to add");
            return Ok(());
        }

        let vectors = self.embed_blocking(documents.to_vec()).await?;
        let batch = self.build_batch(ids, documents, metadatas, vectors)?;
        let table = self
            .db
            .open_table(&self.table_name)
            .execute()
            .await
            .context("Failed to open collection table")?;
        let reader = RecordBatchIterator::new(vec![Ok(batch)], self.schema());
        table
            .add(Box::new(reader))
            .execute()
            .await
            .context("Failed to insert documents")?;

        tracing::info!(count = documents.len(), "added documents to vector store");
        Ok(())
    }

    /// Cosine k-NN search. `k` must be at least 1.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<RetrievalResult> {
        if k < 1 {
            bail!("k must be at least 1");
        }

        let query_vector = self
            .embed_blocking(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty query embedding"))?;

        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut builder = table
            .query()
            .nearest_to(query_vector.as_slice())?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k);
        if let Some(predicate) = filter.and_then(MetadataFilter::predicate) {
            builder = builder.only_if(predicate);
        }

        let results = builder
            .execute()
            .await
            .context("LanceDB vector search failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        let result = extract_results(&batches);
        tracing::debug!(query, hits = result.ids.len(), "vector search complete");
        Ok(result)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<VectorStoreEntry>> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let predicate = format!("id = '{}'", id.replace('\'', "''"));
        let results = table
            .query()
            .only_if(predicate)
            .execute()
            .await
            .context("LanceDB id lookup failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        let extracted = extract_results(&batches);
        if extracted.ids.is_empty() {
            tracing::warn!(id, "document not found");
            return Ok(None);
        }
        Ok(Some(VectorStoreEntry {
            id: extracted.ids[0].clone(),
            document: extracted.documents[0].clone(),
            metadata: extracted.metadatas[0].clone(),
        }))
    }

    pub async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let table = self.db.open_table(&self.table_name).execute().await?;
        let id_list: Vec<String> = ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect();
        table
            .delete(&format!("id IN ({})", id_list.join(", ")))
            .await?;
        tracing::info!(count = ids.len(), "deleted documents");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.table_name) {
            self.db.drop_table(&self.table_name, &[]).await?;
        }
        self.ensure_table().await?;
        tracing::info!("collection cleared");
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        Ok(table.count_rows(None).await?)
    }
}

fn extract_results(batches: &[RecordBatch]) -> RetrievalResult {
    let mut result = RetrievalResult::default();
    for batch in batches {
        let ids = batch
            .column_by_name("id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let documents = batch
            .column_by_name("document")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let metadata_jsons = batch
            .column_by_name("metadata_json")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(documents)) = (ids, documents) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            result.ids.push(ids.value(i).to_string());
            result.documents.push(documents.value(i).to_string());
            result.metadatas.push(
                metadata_jsons
                    .map(|m| {
                        serde_json::from_str(m.value(i))
                            .unwrap_or(JsonValue::Object(Default::default()))
                    })
                    .unwrap_or(JsonValue::Object(Default::default())),
            );
            result
                .distances
                .push(distances.map(|d| d.value(i)).unwrap_or(0.0));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::test_support::HashEmbedder;
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, VectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::new(
            dir.path().to_str().unwrap(),
            Arc::new(HashEmbedder::new()),
        )
        .await
        .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn add_rejects_mismatched_lengths() {
        let (_dir, store) = store().await;
        let err = store
            .add(
                &["doc".to_string()],
                &[json!({}), json!({})],
                &["a".to_string()],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("same length"));
    }

    #[tokio::test]
    async fn k1_on_single_entry_returns_it_with_zero_distance() {
        let (_dir, store) = store().await;
        store
            .add(
                &["The Fool represents new beginnings".to_string()],
                &[json!({"type": "card", "card_id": 0})],
                &["card_0_meaning".to_string()],
            )
            .await
            .unwrap();

        let result = store
            .search("The Fool represents new beginnings", 1, None)
            .await
            .unwrap();
        assert_eq!(result.ids, vec!["card_0_meaning"]);
        assert_eq!(result.documents.len(), 1);
        assert!(result.distances[0].abs() < 1e-5);
    }

    #[tokio::test]
    async fn zero_k_is_rejected() {
        let (_dir, store) = store().await;
        assert!(store.search("q", 0, None).await.is_err());
    }

    #[tokio::test]
    async fn metadata_filter_restricts_hits() {
        let (_dir, store) = store().await;
        store
            .add(
                &[
                    "fool meaning".to_string(),
                    "magician meaning".to_string(),
                    "spread guide".to_string(),
                ],
                &[
                    json!({"type": "card", "card_id": 0}),
                    json!({"type": "card", "card_id": 1}),
                    json!({"type": "spread", "spread_id": "one_card"}),
                ],
                &["a".to_string(), "b".to_string(), "c".to_string()],
            )
            .await
            .unwrap();

        let by_card = store
            .search("meaning", 5, Some(&MetadataFilter::card(0)))
            .await
            .unwrap();
        assert_eq!(by_card.ids, vec!["a"]);

        let by_spread = store
            .search(
                "guide",
                5,
                Some(&MetadataFilter {
                    doc_type: Some("spread".into()),
                    spread_id: Some("one_card".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert_eq!(by_spread.ids, vec!["c"]);
    }

    #[tokio::test]
    async fn get_delete_clear_count_roundtrip() {
        let (_dir, store) = store().await;
        store
            .add(
                &["alpha".to_string(), "beta".to_string()],
                &[json!({"type": "card"}), json!({"type": "card"})],
                &["a".to_string(), "b".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let entry = store.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(entry.document, "alpha");
        assert!(store.get_by_id("zz").await.unwrap().is_none());

        store.delete(&["a".to_string()]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reinitialization_reuses_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        {
            let store = VectorStore::new(&path, Arc::new(HashEmbedder::new()))
                .await
                .unwrap();
            store
                .add(
                    &["persisted".to_string()],
                    &[json!({"type": "card"})],
                    &["keep".to_string()],
                )
                .await
                .unwrap();
        }
        let reopened = VectorStore::new(&path, Arc::new(HashEmbedder::new()))
            .await
            .unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }

    #[test]
    fn predicate_escapes_quotes() {
        let filter = MetadataFilter::category("lover's path");
        assert_eq!(
            filter.predicate().unwrap(),
            "category = 'lover''s path'"
        );
        assert!(MetadataFilter::default().predicate().is_none());
    }
}
