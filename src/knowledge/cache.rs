//! TTL-scoped cache of external source lookups, stored as a reserved
//! vector collection.
//!
//! Similarity is only an approximate key: every read re-filters candidates
//! by exact source match and TTL, so racing writers that duplicate a logical
//! key are harmless.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::base::{KnowledgeBase, EXTERNAL_CACHE_COLLECTION};
use super::vector::{MetaValue, SearchResult};

/// Candidate pool fetched per lookup before the source/TTL filter.
const CANDIDATE_POOL: usize = 20;

/// Base score assigned to cache hits that carry no score of their own.
const CACHED_BASE_SCORE: f32 = 0.85;

pub struct ExternalCache {
    kb: Arc<KnowledgeBase>,
    ttl_seconds: i64,
}

impl ExternalCache {
    pub fn new(kb: Arc<KnowledgeBase>, ttl_seconds: i64) -> Self {
        Self { kb, ttl_seconds }
    }

    /// Look up cached results for a query and source.
    ///
    /// Store errors are treated as a miss; candidates from other sources or
    /// older than the TTL are rejected no matter how similar they rank.
    pub async fn get(&self, query: &str, source: &str) -> Vec<SearchResult> {
        let candidates = match self
            .kb
            .search(EXTERNAL_CACHE_COLLECTION, query, CANDIDATE_POOL)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("Error reading external cache: {}", e);
                return vec![];
            }
        };

        let now = Utc::now().timestamp();
        let mut valid = Vec::new();

        for hit in candidates {
            match hit.metadata.get("source_type").and_then(|v| v.as_str()) {
                Some(s) if s == source => {}
                _ => continue,
            }

            let cached_at = hit
                .metadata
                .get("cached_at")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            if now - cached_at > self.ttl_seconds {
                continue;
            }

            let base_score = hit
                .metadata
                .get("score")
                .and_then(|v| v.as_f64())
                .map(|s| s as f32)
                .unwrap_or(CACHED_BASE_SCORE);

            valid.push(SearchResult {
                source_type: source.to_string(),
                document: hit.document,
                metadata: hit.metadata,
                base_score,
                adjusted_score: base_score,
            });
        }

        valid
    }

    /// Write results through to the cache. No-op on empty input; write
    /// failures are logged and dropped, never surfaced to the retrieval path.
    pub async fn set(&self, query: &str, source: &str, results: &[SearchResult]) {
        if results.is_empty() {
            return;
        }

        let now = Utc::now().timestamp();
        let mut ids = Vec::with_capacity(results.len());
        let mut documents = Vec::with_capacity(results.len());
        let mut metadatas = Vec::with_capacity(results.len());

        for result in results {
            let mut meta = result.metadata.clone();
            meta.insert(
                "source_type".to_string(),
                MetaValue::Text(source.to_string()),
            );
            meta.insert("cached_at".to_string(), MetaValue::Int(now));
            meta.insert("query_text".to_string(), MetaValue::Text(query.to_string()));
            meta.insert(
                "score".to_string(),
                MetaValue::Float(result.base_score as f64),
            );

            ids.push(format!("cache_{}_{}", source, Uuid::new_v4()));
            documents.push(result.document.clone());
            metadatas.push(meta);
        }

        if let Err(e) = self
            .kb
            .add_documents(EXTERNAL_CACHE_COLLECTION, ids, documents, metadatas)
            .await
        {
            tracing::warn!("Error writing to external cache: {}", e);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
