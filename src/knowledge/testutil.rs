//! In-memory test doubles for the vector store and embedder.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;

use super::vector::{CollectionHit, VectorRecord, VectorStore};

const MOCK_DIMENSION: usize = 16;

/// Deterministic embedder: token-hash bag of words, L2-normalised.
/// Identical texts embed identically; overlapping texts correlate.
#[derive(Default)]
pub struct MockEmbedder;

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        Ok(embed(text))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(embed(text))
    }

    fn dimension(&self) -> usize {
        MOCK_DIMENSION
    }
}

fn embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; MOCK_DIMENSION];
    for word in text.to_lowercase().split_whitespace() {
        let mut h: u64 = 1469598103934665603;
        for b in word.bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        v[(h % MOCK_DIMENSION as u64) as usize] += 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// In-memory vector store. Supports scripted hits per collection (returned
/// verbatim, ahead of similarity search) and injected per-collection
/// failures, for exercising degradation paths.
pub struct MockVectorStore {
    records: Mutex<HashMap<String, Vec<VectorRecord>>>,
    scripted: Mutex<HashMap<String, Vec<CollectionHit>>>,
    failing: Mutex<HashSet<String>>,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            scripted: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make every query against `collection` return exactly these hits.
    pub fn script(&self, collection: &str, hits: Vec<CollectionHit>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(collection.to_string(), hits);
    }

    /// Make every operation against `collection` fail.
    pub fn fail(&self, collection: &str) {
        self.failing.lock().unwrap().insert(collection.to_string());
    }

    fn check_failure(&self, collection: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(collection) {
            anyhow::bail!("injected store failure for {}", collection);
        }
        Ok(())
    }
}

impl Default for MockVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        self.check_failure(collection)?;
        let mut all = self.records.lock().unwrap();
        let entry = all.entry(collection.to_string()).or_default();
        for record in records {
            entry.retain(|r| r.id != record.id);
            entry.push(record.clone());
        }
        Ok(records.len())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
    ) -> Result<Vec<CollectionHit>> {
        self.check_failure(collection)?;

        if let Some(hits) = self.scripted.lock().unwrap().get(collection) {
            return Ok(hits.iter().take(n_results).cloned().collect());
        }

        let all = self.records.lock().unwrap();
        let Some(records) = all.get(collection) else {
            return Ok(vec![]);
        };

        let mut hits: Vec<CollectionHit> = records
            .iter()
            .map(|r| CollectionHit {
                id: r.id.clone(),
                document: r.document.clone(),
                metadata: r.metadata.clone(),
                similarity: cosine(embedding, &r.embedding).max(0.0),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(n_results);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.check_failure(collection)?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(collection)
            .map(|r| r.len())
            .unwrap_or(0))
    }
}

/// Build a hit with the given source metadata, for scripting.
pub fn hit_for_source(id: &str, document: &str, source: &str, similarity: f32) -> CollectionHit {
    CollectionHit {
        id: id.to_string(),
        document: document.to_string(),
        metadata: [(
            "source_type".to_string(),
            super::vector::MetaValue::Text(source.to_string()),
        )]
        .into_iter()
        .collect(),
        similarity,
    }
}
