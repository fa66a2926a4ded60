//! Telemetry module - persisted ranking weights, answer events, feedback,
//! and the offline trainer that closes the loop between them.

mod store;
mod trainer;
mod worker;

use crate::knowledge::SearchResult;

// Re-exports
pub use store::{
    FeedbackSample, RankedSource, TelemetryError, TelemetryStore, WEIGHT_MAX, WEIGHT_MIN,
};
pub use trainer::{TrainMode, TrainStatus, WeightTrainer};
pub use worker::{spawn_worker, TelemetryEvent, TelemetrySender, DEFAULT_QUEUE_CAPACITY};

/// Ranked-source rows for an answer's final result list, rank starting at 1.
pub fn ranked_sources(results: &[SearchResult]) -> Vec<RankedSource> {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| RankedSource {
            source_name: r.source_type.clone(),
            raw_score: r.base_score as f64,
            adjusted_score: r.adjusted_score as f64,
            rank: (i + 1) as i64,
        })
        .collect()
}
