//! Central knowledge base: named collections over a vector store plus an
//! embedding provider.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::EmbeddingProvider;

use super::vector::{CollectionHit, Metadata, VectorRecord, VectorStore};

/// Topical collections searched by the local retriever.
pub const LOCAL_COLLECTIONS: [&str; 5] = [
    "practica_forense",
    "libros",
    "jurisprudencia",
    "legislacion",
    "doctrina",
];

/// Reserved collection holding cached external lookups.
pub const EXTERNAL_CACHE_COLLECTION: &str = "external_cache";

/// Knowledge base over embedded document collections.
///
/// Constructed once at the composition root and shared by reference;
/// the store and embedder are the only process-wide singletons.
pub struct KnowledgeBase {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Embed and upsert documents into a collection.
    pub async fn add_documents(
        &self,
        collection: &str,
        ids: Vec<String>,
        texts: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        anyhow::ensure!(
            ids.len() == texts.len() && ids.len() == metadatas.len(),
            "ids, texts and metadatas must have equal length"
        );

        let mut records = Vec::with_capacity(ids.len());
        for ((id, text), metadata) in ids.into_iter().zip(texts).zip(metadatas) {
            let embedding = self
                .embedder
                .embed_document(&text)
                .await
                .context("Failed to embed document")?;
            records.push(VectorRecord {
                id,
                document: text,
                metadata,
                embedding,
            });
        }

        let n = self.store.upsert(collection, &records).await?;
        tracing::info!("Upserted {} documents into {}", n, collection);
        Ok(n)
    }

    /// Semantic search over one collection.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<CollectionHit>> {
        let embedding = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;

        self.store.query(collection, &embedding, top_k).await
    }

    /// Record count for a collection.
    pub async fn collection_count(&self, collection: &str) -> Result<usize> {
        self.store.count(collection).await
    }
}

// ============================================================================
// Tests
// ============================================================================
