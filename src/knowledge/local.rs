//! Local retrieval across the topical knowledge collections.

use std::sync::Arc;

use super::base::{KnowledgeBase, LOCAL_COLLECTIONS};
use super::vector::{MetaValue, SearchResult};

/// Floor on the per-collection budget, so small `top_k` values still give
/// every collection a chance to surface evidence.
const MIN_PER_COLLECTION: usize = 2;

/// Searches every local collection and tags hits with their collection name.
pub struct LocalRetriever {
    kb: Arc<KnowledgeBase>,
    collections: Vec<String>,
}

impl LocalRetriever {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self {
            kb,
            collections: LOCAL_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn with_collections(kb: Arc<KnowledgeBase>, collections: Vec<String>) -> Self {
        Self { kb, collections }
    }

    /// The collection names this retriever covers.
    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    /// Per-collection budget for a given overall `top_k`.
    pub fn k_per_collection(top_k: usize) -> usize {
        MIN_PER_COLLECTION.max(top_k / 2)
    }

    /// Search all configured collections. A failing collection contributes
    /// nothing; it never fails the call.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        self.search_collections(&self.collections, query, Self::k_per_collection(top_k))
            .await
    }

    /// Search an explicit set of collections with a fixed per-collection
    /// budget.
    pub async fn search_collections(
        &self,
        collections: &[String],
        query: &str,
        k_per_collection: usize,
    ) -> Vec<SearchResult> {
        let mut results = Vec::new();

        for collection in collections {
            match self.kb.search(collection, query, k_per_collection).await {
                Ok(hits) => {
                    for hit in hits {
                        let mut metadata = hit.metadata;
                        metadata.insert(
                            "source_type".to_string(),
                            MetaValue::Text(collection.clone()),
                        );
                        let base_score = hit.similarity.clamp(0.0, 1.0);
                        results.push(SearchResult {
                            source_type: collection.clone(),
                            document: hit.document,
                            metadata,
                            base_score,
                            adjusted_score: base_score,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!("Error searching local collection {}: {}", collection, e);
                }
            }
        }

        results
    }
}

// ============================================================================
// Tests
// ============================================================================
