//! Offline weight training from accumulated feedback.
//!
//! Joins ranked-source rows to feedback rows by correlation id and turns
//! helpfulness signals into per-source ranking weights. Both variants write
//! exclusively through the store's clamping upsert; an aborted run leaves
//! the weight table untouched.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;

use super::store::{FeedbackSample, TelemetryStore};

/// Learning-rate equivalent of the heuristic: one helpful vote moves a
/// source's weight by this much.
const HEURISTIC_STEP: f64 = 0.1;

/// Training algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainMode {
    /// Vote counting: `1.0 + 0.1 * Σ(±1)` per source.
    Heuristic,
    /// Logistic regression over one-hot source-presence vectors.
    Model,
}

/// Outcome of a training run. Aborted runs report why instead of raising.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainStatus {
    /// Weights recomputed and stored.
    Updated { weights: HashMap<String, f64> },
    /// No feedback rows joined to any event; nothing written.
    SkippedNoFeedback,
    /// Model variant requires both helpful and unhelpful labels.
    SkippedSingleClass,
}

pub struct WeightTrainer {
    store: Arc<TelemetryStore>,
}

impl WeightTrainer {
    pub fn new(store: Arc<TelemetryStore>) -> Self {
        Self { store }
    }

    /// Recompute source weights from recorded feedback.
    pub fn train(&self, mode: TrainMode) -> Result<TrainStatus> {
        let samples = self.store.feedback_samples()?;
        if samples.is_empty() {
            tracing::warn!("No feedback data found, skipping training");
            return Ok(TrainStatus::SkippedNoFeedback);
        }

        let weights = match mode {
            TrainMode::Heuristic => heuristic_weights(&samples),
            TrainMode::Model => {
                let has_positive = samples.iter().any(|s| s.is_helpful);
                let has_negative = samples.iter().any(|s| !s.is_helpful);
                if !has_positive || !has_negative {
                    tracing::warn!(
                        "Model training needs both helpful and unhelpful labels, skipping"
                    );
                    return Ok(TrainStatus::SkippedSingleClass);
                }
                model_weights(&samples)
            }
        };

        for (source, weight) in &weights {
            self.store.upsert_weight(source, *weight)?;
        }

        tracing::info!("Source weights updated: {:?}", weights);
        Ok(TrainStatus::Updated { weights })
    }
}

/// Vote-counting variant: each helpful feedback on an event contributes +1
/// to every source ranked in it, each unhelpful one -1.
fn heuristic_weights(samples: &[FeedbackSample]) -> HashMap<String, f64> {
    let mut deltas: HashMap<String, f64> = HashMap::new();
    for sample in samples {
        let delta = if sample.is_helpful { 1.0 } else { -1.0 };
        *deltas.entry(sample.source_name.clone()).or_insert(0.0) += delta;
    }

    deltas
        .into_iter()
        .map(|(source, delta)| (source, 1.0 + delta * HEURISTIC_STEP))
        .collect()
}

/// Model variant: logistic regression of helpfulness on source presence,
/// then each coefficient mapped through a bounded monotonic transform.
fn model_weights(samples: &[FeedbackSample]) -> HashMap<String, f64> {
    // One training example per (event, label): the set of sources ranked in
    // that event, against the feedback label.
    let mut examples: BTreeMap<(String, bool), BTreeSet<String>> = BTreeMap::new();
    for sample in samples {
        examples
            .entry((sample.correlation_id.clone(), sample.is_helpful))
            .or_default()
            .insert(sample.source_name.clone());
    }

    let sources: Vec<String> = samples
        .iter()
        .map(|s| s.source_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let rows: Vec<(Vec<f64>, f64)> = examples
        .iter()
        .map(|((_, helpful), present)| {
            let x = sources
                .iter()
                .map(|s| if present.contains(s) { 1.0 } else { 0.0 })
                .collect();
            (x, if *helpful { 1.0 } else { 0.0 })
        })
        .collect();

    let coefficients = fit_logistic(&rows, sources.len());

    sources
        .into_iter()
        .zip(coefficients)
        .map(|(source, coef)| (source, coefficient_to_weight(coef)))
        .collect()
}

/// Batch gradient descent on the logistic loss. The feature space is a
/// handful of sources, so a fixed-iteration solve is plenty.
fn fit_logistic(rows: &[(Vec<f64>, f64)], n_features: usize) -> Vec<f64> {
    const EPOCHS: usize = 500;
    const LEARNING_RATE: f64 = 0.5;

    let mut coef = vec![0.0; n_features];
    let mut bias = 0.0;
    let n = rows.len() as f64;

    for _ in 0..EPOCHS {
        let mut grad = vec![0.0; n_features];
        let mut grad_bias = 0.0;

        for (x, y) in rows {
            let z: f64 = bias + coef.iter().zip(x).map(|(c, xi)| c * xi).sum::<f64>();
            let error = sigmoid(z) - y;
            for (g, xi) in grad.iter_mut().zip(x) {
                *g += error * xi;
            }
            grad_bias += error;
        }

        for (c, g) in coef.iter_mut().zip(&grad) {
            *c -= LEARNING_RATE * g / n;
        }
        bias -= LEARNING_RATE * grad_bias / n;
    }

    coef
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Map a coefficient around 0 into the weight range: tanh bounds the
/// influence of extreme coefficients, 0 maps to the neutral 1.5 midpoint
/// of its output span.
fn coefficient_to_weight(coef: f64) -> f64 {
    0.5 + (1.0 + coef.tanh())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::store::RankedSource;
    use tempfile::TempDir;

    fn trainer_with_store() -> (TempDir, Arc<TelemetryStore>, WeightTrainer) {
        let dir = TempDir::new().unwrap();
        let store =
            Arc::new(TelemetryStore::open(&dir.path().join("telemetry.db"), true).unwrap());
        let trainer = WeightTrainer::new(store.clone());
        (dir, store, trainer)
    }

    fn ranked(source: &str) -> RankedSource {
        RankedSource {
            source_name: source.to_string(),
            raw_score: 0.8,
            adjusted_score: 0.8,
            rank: 1,
        }
    }

    #[test]
    fn test_no_feedback_skips_without_writes() {
        let (_dir, store, trainer) = trainer_with_store();

        let status = trainer.train(TrainMode::Heuristic).unwrap();
        assert_eq!(status, TrainStatus::SkippedNoFeedback);
        assert!(store.get_source_weights(None).unwrap().is_empty());
    }

    #[test]
    fn test_heuristic_rewards_cited_sources() {
        let (_dir, store, trainer) = trainer_with_store();

        // 5 helpful events, all citing pjud, none citing bcn.
        for i in 0..5 {
            let id = format!("c{}", i);
            store
                .log_event(&id, "pregunta", "respuesta", &[ranked("pjud")])
                .unwrap();
            store.log_feedback(&id, true, None).unwrap();
        }

        let status = trainer.train(TrainMode::Heuristic).unwrap();
        assert!(matches!(status, TrainStatus::Updated { .. }));

        let weights = store.get_source_weights(None).unwrap();
        assert!(weights["pjud"] > 1.0);
        assert!((weights["pjud"] - 1.5).abs() < 1e-9);
        // No data for bcn: stays unmaterialized, implicit default 1.0.
        assert!(!weights.contains_key("bcn"));
    }

    #[test]
    fn test_heuristic_punishes_unhelpful() {
        let (_dir, store, trainer) = trainer_with_store();

        for i in 0..3 {
            let id = format!("c{}", i);
            store
                .log_event(&id, "q", "a", &[ranked("scielo")])
                .unwrap();
            store.log_feedback(&id, false, None).unwrap();
        }

        trainer.train(TrainMode::Heuristic).unwrap();
        let weights = store.get_source_weights(None).unwrap();
        assert!((weights["scielo"] - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_heuristic_respects_clamp() {
        let (_dir, store, trainer) = trainer_with_store();

        // 30 positive votes would give 4.0 unclamped.
        for i in 0..30 {
            let id = format!("c{}", i);
            store.log_event(&id, "q", "a", &[ranked("pjud")]).unwrap();
            store.log_feedback(&id, true, None).unwrap();
        }

        trainer.train(TrainMode::Heuristic).unwrap();
        let weights = store.get_source_weights(None).unwrap();
        assert!((weights["pjud"] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_model_requires_both_classes() {
        let (_dir, store, trainer) = trainer_with_store();

        store.log_event("c1", "q", "a", &[ranked("pjud")]).unwrap();
        store.log_feedback("c1", true, None).unwrap();

        let status = trainer.train(TrainMode::Model).unwrap();
        assert_eq!(status, TrainStatus::SkippedSingleClass);
        assert!(store.get_source_weights(None).unwrap().is_empty());
    }

    #[test]
    fn test_model_separates_good_from_bad_source() {
        let (_dir, store, trainer) = trainer_with_store();

        for i in 0..6 {
            let id = format!("p{}", i);
            store.log_event(&id, "q", "a", &[ranked("pjud")]).unwrap();
            store.log_feedback(&id, true, None).unwrap();
        }
        for i in 0..6 {
            let id = format!("n{}", i);
            store.log_event(&id, "q", "a", &[ranked("bcn")]).unwrap();
            store.log_feedback(&id, false, None).unwrap();
        }

        let status = trainer.train(TrainMode::Model).unwrap();
        assert!(matches!(status, TrainStatus::Updated { .. }));

        let weights = store.get_source_weights(None).unwrap();
        assert!(weights["pjud"] > weights["bcn"]);
        for w in weights.values() {
            assert!(*w >= 0.5 && *w <= 3.0);
        }
    }

    #[test]
    fn test_coefficient_transform_bounded_and_monotone() {
        let low = coefficient_to_weight(-10.0);
        let mid = coefficient_to_weight(0.0);
        let high = coefficient_to_weight(10.0);

        assert!(low < mid && mid < high);
        assert!((mid - 1.5).abs() < 1e-9);
        assert!(low >= 0.5 && high <= 2.5);
    }

    #[test]
    fn test_fit_logistic_learns_sign() {
        // Feature present => label 1, absent => label 0.
        let rows = vec![
            (vec![1.0, 0.0], 1.0),
            (vec![1.0, 0.0], 1.0),
            (vec![0.0, 1.0], 0.0),
            (vec![0.0, 1.0], 0.0),
        ];
        let coef = fit_logistic(&rows, 2);
        assert!(coef[0] > 0.0);
        assert!(coef[1] < 0.0);
    }
}
