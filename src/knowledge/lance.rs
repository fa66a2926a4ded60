//! LanceDB-backed vector store.
//!
//! Each logical collection maps to one Lance table. Metadata travels as a
//! JSON column of scalar values.
//!
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::vector::{
    distance_to_similarity, CollectionHit, Metadata, VectorRecord, VectorStore,
    EMBEDDING_DIMENSION,
};

// ============================================================================
// LanceVectorStore
// ============================================================================

/// Named-collection vector store on a local LanceDB directory.
pub struct LanceVectorStore {
    db: Connection,
}

impl LanceVectorStore {
    /// Open (or create) the store at the given `.lance` directory.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db })
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("document", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    EMBEDDING_DIMENSION,
                ),
                false,
            ),
        ])
    }

    fn records_to_batch(records: &[VectorRecord]) -> Result<RecordBatch> {
        if records.is_empty() {
            anyhow::bail!("Cannot create batch from empty records");
        }

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let documents: Vec<&str> = records.iter().map(|r| r.document.as_str()).collect();

        let metadatas = records
            .iter()
            .map(|r| serde_json::to_string(&r.metadata).context("Failed to serialize metadata"))
            .collect::<Result<Vec<String>>>()?;

        let embeddings_flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embedding_list = FixedSizeListArray::try_new(
            field,
            EMBEDDING_DIMENSION,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(Self::schema()),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(documents)),
                Arc::new(StringArray::from(metadatas)),
                Arc::new(embedding_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    async fn table_exists(&self, name: &str) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == name))
            .unwrap_or(false)
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = Self::records_to_batch(records)?;
        let schema = batch.schema();

        if self.table_exists(collection).await {
            let table = self
                .db
                .open_table(collection)
                .execute()
                .await
                .context("Failed to open collection table")?;

            // Replace existing ids so re-ingestion does not accumulate rows.
            let id_list = records
                .iter()
                .map(|r| format!("'{}'", r.id.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(", ");
            table
                .delete(&format!("id IN ({})", id_list))
                .await
                .context("Failed to delete superseded records")?;

            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add records to collection")?;
        } else {
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(collection, batches)
                .execute()
                .await
                .context("Failed to create collection table")?;
        }

        Ok(records.len())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<CollectionHit>> {
        if n_results == 0 || !self.table_exists(collection).await {
            return Ok(vec![]);
        }

        let table = self
            .db
            .open_table(collection)
            .execute()
            .await
            .context("Failed to open collection for query")?;

        let results = table
            .vector_search(embedding.to_vec())
            .context("Failed to build vector search")?
            .limit(n_results)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut hits = Vec::new();
        for batch in batches {
            let ids = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing id column"))?;

            let documents = batch
                .column_by_name("document")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing document column"))?;

            let metadatas = batch
                .column_by_name("metadata")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing metadata column"))?;

            // _distance is appended by LanceDB on vector searches.
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let metadata: Metadata =
                    serde_json::from_str(metadatas.value(i)).unwrap_or_default();

                hits.push(CollectionHit {
                    id: ids.value(i).to_string(),
                    document: documents.value(i).to_string(),
                    metadata,
                    similarity: distance_to_similarity(distances.value(i)),
                });
            }
        }

        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        if !self.table_exists(collection).await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(collection)
            .execute()
            .await
            .context("Failed to open collection for count")?;

        table.count_rows(None).await.context("Failed to count rows")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::vector::MetaValue;
    use tempfile::TempDir;

    fn record(id: &str, text: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            document: text.to_string(),
            metadata: [(
                "source_type".to_string(),
                MetaValue::Text("jurisprudencia".to_string()),
            )]
            .into_iter()
            .collect(),
            embedding: vec![0.1; EMBEDDING_DIMENSION as usize],
        }
    }

    #[tokio::test]
    async fn test_upsert_and_count() {
        let dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&dir.path().join("test.lance"))
            .await
            .unwrap();

        assert_eq!(store.count("jurisprudencia").await.unwrap(), 0);

        let n = store
            .upsert("jurisprudencia", &[record("a", "fallo 1"), record("b", "fallo 2")])
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.count("jurisprudencia").await.unwrap(), 2);

        // Same ids replace, not accumulate.
        store
            .upsert("jurisprudencia", &[record("a", "fallo 1 rev")])
            .await
            .unwrap();
        assert_eq!(store.count("jurisprudencia").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_returns_metadata_and_similarity() {
        let dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&dir.path().join("query.lance"))
            .await
            .unwrap();

        store
            .upsert("doctrina", &[record("x", "responsabilidad civil")])
            .await
            .unwrap();

        let query = vec![0.1; EMBEDDING_DIMENSION as usize];
        let hits = store.query("doctrina", &query, 5).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document, "responsabilidad civil");
        assert!(hits[0].similarity > 0.0 && hits[0].similarity <= 1.0);
        assert_eq!(
            hits[0].metadata.get("source_type"),
            Some(&MetaValue::Text("jurisprudencia".to_string()))
        );
    }

    #[tokio::test]
    async fn test_query_unknown_collection_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(&dir.path().join("empty.lance"))
            .await
            .unwrap();

        let query = vec![0.0; EMBEDDING_DIMENSION as usize];
        let hits = store.query("no_such_collection", &query, 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
