//! Weighted scoring and stable ranking of merged evidence.

use std::collections::HashMap;

use crate::knowledge::SearchResult;
use crate::telemetry::TelemetryStore;

/// Per-source ranking multipliers. Sources absent from the map weigh 1.0.
pub type SourceWeights = HashMap<String, f64>;

/// Where the orchestrator gets its current weights from.
pub trait WeightProvider: Send + Sync {
    fn source_weights(&self, area: Option<&str>) -> anyhow::Result<SourceWeights>;
}

impl WeightProvider for TelemetryStore {
    fn source_weights(&self, area: Option<&str>) -> anyhow::Result<SourceWeights> {
        Ok(self.get_source_weights(area)?)
    }
}

/// Base score times the source's learned weight.
pub fn adjusted_score(result: &SearchResult, weights: &SourceWeights) -> f32 {
    let weight = weights.get(&result.source_type).copied().unwrap_or(1.0);
    result.base_score * weight as f32
}

/// Recompute every result's adjusted score from the given weights.
pub fn apply_weights(results: &mut [SearchResult], weights: &SourceWeights) {
    for result in results.iter_mut() {
        result.adjusted_score = adjusted_score(result, weights);
    }
}

/// Sort descending by adjusted score. The sort is stable: equal scores keep
/// their input order. Truncation to `top_k` is the caller's job, after
/// ranking.
pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.adjusted_score
            .partial_cmp(&a.adjusted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ============================================================================
// Tests
// ============================================================================
