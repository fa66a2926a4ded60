//! lexrag - motor de recuperación legal chileno.
//!
//! Combina colecciones locales en LanceDB con fuentes externas (Poder
//! Judicial, LeyChile, SciELO) detrás de una caché con TTL, y ajusta el
//! ranking con pesos aprendidos del feedback de los usuarios.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod knowledge;
pub mod scraper;
pub mod search;
pub mod telemetry;

// Re-exports
pub use config::{get_data_dir, Settings};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use knowledge::{
    ExternalCache, KnowledgeBase, LanceVectorStore, LocalRetriever, MetaValue, Metadata,
    SearchResult, VectorStore, EXTERNAL_CACHE_COLLECTION, LOCAL_COLLECTIONS,
};
pub use scraper::{ScrapeError, SourceRegistry, SourceScraper};
pub use search::{ExternalRetriever, SearchOrchestrator, SourceWeights, WeightProvider};
pub use telemetry::{
    TelemetryStore, TrainMode, TrainStatus, WeightTrainer, WEIGHT_MAX, WEIGHT_MIN,
};
