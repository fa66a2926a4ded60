//! Vector store trait and retrieval data types.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Embedding dimension used across all collections.
pub const EMBEDDING_DIMENSION: i32 = 768;

// ============================================================================
// Types
// ============================================================================

/// Scalar metadata value. Collections store flat metadata only; anything
/// non-scalar is stringified before it gets here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    /// Convert a JSON value into a scalar, stringifying arrays/objects.
    /// Returns None for JSON null.
    pub fn from_json(value: &serde_json::Value) -> Option<MetaValue> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(MetaValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(MetaValue::Int(i))
                } else {
                    Some(MetaValue::Float(n.as_f64().unwrap_or(0.0)))
                }
            }
            serde_json::Value::String(s) => Some(MetaValue::Text(s.clone())),
            other => Some(MetaValue::Text(other.to_string())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            MetaValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Float(f) => Some(*f),
            MetaValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// Flat metadata map attached to every stored document.
pub type Metadata = HashMap<String, MetaValue>;

/// A record to upsert into a collection.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// A similarity hit returned by a collection query.
#[derive(Debug, Clone)]
pub struct CollectionHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// Similarity in (0, 1], monotone in the inverse of vector distance.
    pub similarity: f32,
}

/// One piece of retrieved evidence, local or external. Transient; only its
/// scalar summary (source, scores, rank) is ever persisted.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Local collection name or external source name.
    pub source_type: String,
    pub document: String,
    pub metadata: Metadata,
    /// Source-intrinsic relevance prior to weighting, in [0, 1].
    pub base_score: f32,
    /// `base_score` times the source's learned weight.
    pub adjusted_score: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// Named-collection vector store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records in a collection, creating it if needed.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize>;

    /// Nearest-neighbour query against a collection. An unknown collection
    /// yields an empty result, not an error.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<CollectionHit>>;

    /// Number of records in a collection (0 if it does not exist).
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// Convert a raw vector distance to a similarity in (0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

// ============================================================================
// Tests
// ============================================================================
