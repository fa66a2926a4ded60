//! Knowledge module - embedded document collections and the external cache.
//!
//! - LanceDB: vector storage with one table per collection
//! - KnowledgeBase: embedding + collection access in one place
//! - LocalRetriever: fan-out over the topical local collections
//! - ExternalCache: TTL-scoped cache of external source lookups

mod base;
mod cache;
mod lance;
mod local;
mod vector;

#[cfg(test)]
pub mod testutil;

// Re-exports
pub use base::{KnowledgeBase, EXTERNAL_CACHE_COLLECTION, LOCAL_COLLECTIONS};
pub use cache::ExternalCache;
pub use lance::LanceVectorStore;
pub use local::LocalRetriever;
pub use vector::{
    distance_to_similarity, CollectionHit, MetaValue, Metadata, SearchResult, VectorRecord,
    VectorStore, EMBEDDING_DIMENSION,
};
