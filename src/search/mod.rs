//! Search module - retrieval orchestration and adaptive ranking.
//!
//! - ExternalRetriever: cache-first access to one external source
//! - SearchOrchestrator: concurrent fan-out, merge, weight, rank
//! - scoring: weight application and stable ranking

mod external;
mod orchestrator;
mod scoring;

// Re-exports
pub use external::ExternalRetriever;
pub use orchestrator::{SearchOrchestrator, DEFAULT_BRANCH_TIMEOUT};
pub use scoring::{adjusted_score, apply_weights, rank, SourceWeights, WeightProvider};
