//! Cache-first retrieval from one external source.

use std::sync::Arc;

use crate::knowledge::{ExternalCache, MetaValue, Metadata, SearchResult};
use crate::scraper::{RawItem, SourceRegistry};

/// Base score for freshly scraped evidence.
const FRESH_BASE_SCORE: f32 = 0.8;

/// Wraps the source registry with the external cache. Every failure mode
/// (unknown source, scrape error, cache store error) degrades to an empty
/// contribution; nothing propagates to the orchestrator.
pub struct ExternalRetriever {
    cache: Arc<ExternalCache>,
    registry: Arc<SourceRegistry>,
}

impl ExternalRetriever {
    pub fn new(cache: Arc<ExternalCache>, registry: Arc<SourceRegistry>) -> Self {
        Self { cache, registry }
    }

    /// Registered source names, the orchestrator's fan-out set.
    pub fn source_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Search one source, consulting the cache before the scraper.
    pub async fn search_with_cache(
        &self,
        source: &str,
        query: &str,
        top_k: usize,
    ) -> Vec<SearchResult> {
        // 1. Cache lookup.
        let mut cached = self.cache.get(query, source).await;
        if !cached.is_empty() {
            tracing::info!("Cache hit for {}: {} results", source, cached.len());
            cached.truncate(top_k);
            return cached;
        }

        // 2. Miss: delegate to the scraper.
        let Some(scraper) = self.registry.scraper(source) else {
            tracing::warn!("No scraper registered for source {}", source);
            return vec![];
        };

        let items = match scraper.search(query, top_k).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!("Error scraping {}: {}", source, e);
                return vec![];
            }
        };
        if items.is_empty() {
            return vec![];
        }

        // 3. Normalize and write through.
        let mut results: Vec<SearchResult> = items
            .iter()
            .map(|item| self.normalize(source, item))
            .collect();

        self.cache.set(query, source, &results).await;

        results.truncate(top_k);
        results
    }

    fn normalize(&self, source: &str, item: &RawItem) -> SearchResult {
        let document = self.registry.render(source, item).unwrap_or_default();

        let mut metadata = Metadata::new();
        for (key, value) in item {
            if let Some(scalar) = MetaValue::from_json(value) {
                metadata.insert(key.clone(), scalar);
            }
        }

        SearchResult {
            source_type: source.to_string(),
            document,
            metadata,
            base_score: FRESH_BASE_SCORE,
            adjusted_score: FRESH_BASE_SCORE,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
