//! External source scrapers.
//!
//! Each source is registered as a {scrape, render} capability pair; adding
//! a source means one new registration, never a new branch in the search
//! path. The retrieval engine only ever sees the `SourceScraper` boundary
//! and the `ScrapeError` taxonomy.

pub mod bcn;
pub mod pjud;
pub mod scielo;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

/// A raw item as scraped from a source: flat field map, source-specific keys.
pub type RawItem = serde_json::Map<String, serde_json::Value>;

/// Failure modes a source scraper can surface. The retrieval engine catches
/// all of them and converts the source into an empty contribution.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("{source_name}: rate limited")]
    RateLimited { source_name: String },

    #[error("{source_name}: expected page structure not found ({detail})")]
    StructureChanged { source_name: String, detail: String },

    #[error("{source}: network error: {cause}")]
    Network {
        source: String,
        #[source]
        cause: reqwest::Error,
    },
}

/// One external evidence source.
#[async_trait]
pub trait SourceScraper: Send + Sync {
    /// Source name, used as `source_type` on results and as the cache key.
    fn name(&self) -> &str;

    /// Fetch up to `max_results` raw items for a query.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawItem>, ScrapeError>;
}

/// Renders a raw item into the document text indexed and shown for it.
pub type RenderFn = fn(&RawItem) -> String;

struct SourceEntry {
    scraper: Arc<dyn SourceScraper>,
    render: RenderFn,
}

/// Registry mapping source names to their scrape/render capabilities.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, SourceEntry>,
    order: Vec<String>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in Chilean legal sources.
    pub fn with_default_sources() -> Result<Self> {
        let client = default_client()?;
        let mut registry = Self::new();
        registry.register(Arc::new(pjud::PjudScraper::new(client.clone())), pjud::render);
        registry.register(Arc::new(bcn::BcnScraper::new(client.clone())), bcn::render);
        registry.register(Arc::new(scielo::ScieloScraper::new(client)), scielo::render);
        Ok(registry)
    }

    pub fn register(&mut self, scraper: Arc<dyn SourceScraper>, render: RenderFn) {
        let name = scraper.name().to_string();
        if self
            .sources
            .insert(name.clone(), SourceEntry { scraper, render })
            .is_none()
        {
            self.order.push(name);
        }
    }

    /// Registered source names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn scraper(&self, name: &str) -> Option<Arc<dyn SourceScraper>> {
        self.sources.get(name).map(|e| e.scraper.clone())
    }

    pub fn render(&self, name: &str, item: &RawItem) -> Option<String> {
        self.sources.get(name).map(|e| (e.render)(item))
    }
}

/// Shared HTTP client for all scrapers.
pub fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("lexrag/0.1")
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")
}

/// Pull a string field out of a raw item, empty when missing.
pub(crate) fn field<'a>(item: &'a RawItem, key: &str) -> &'a str {
    item.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// Collapse runs of whitespace, as scraped text tends to carry layout runs.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    if let Ok(re) = regex::Regex::new(r"\s+") {
        re.replace_all(text, " ").trim().to_string()
    } else {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

// ============================================================================
// Tests
// ============================================================================
