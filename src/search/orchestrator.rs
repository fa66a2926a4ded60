//! Concurrent fan-out over local collections and external sources.
//!
//! Each branch runs as its own task under a per-branch timeout. A branch
//! that times out, panics, or errors contributes nothing; the remaining
//! branches still answer. Merged evidence is weighted, ranked, and cut to
//! `top_k` before it leaves this module.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;

use crate::knowledge::{LocalRetriever, SearchResult};
use crate::search::external::ExternalRetriever;
use crate::search::scoring::{self, SourceWeights, WeightProvider};
use crate::telemetry::{TelemetryEvent, TelemetrySender};

/// Default per-branch deadline.
pub const DEFAULT_BRANCH_TIMEOUT: Duration = Duration::from_secs(20);

pub struct SearchOrchestrator {
    local: Arc<LocalRetriever>,
    external: Arc<ExternalRetriever>,
    weights: Arc<dyn WeightProvider>,
    branch_timeout: Duration,
    telemetry: Option<TelemetrySender>,
}

impl SearchOrchestrator {
    pub fn new(
        local: Arc<LocalRetriever>,
        external: Arc<ExternalRetriever>,
        weights: Arc<dyn WeightProvider>,
    ) -> Self {
        Self {
            local,
            external,
            weights,
            branch_timeout: DEFAULT_BRANCH_TIMEOUT,
            telemetry: None,
        }
    }

    pub fn with_branch_timeout(mut self, timeout: Duration) -> Self {
        self.branch_timeout = timeout;
        self
    }

    pub fn with_telemetry(mut self, sender: TelemetrySender) -> Self {
        self.telemetry = Some(sender);
        self
    }

    /// Run the full pipeline: fan out, merge, weight, rank, truncate.
    pub async fn execute(
        &self,
        query: &str,
        top_k: usize,
        use_external: bool,
        area: Option<&str>,
    ) -> Vec<SearchResult> {
        if top_k == 0 {
            return vec![];
        }

        let mut labels = vec!["local".to_string()];
        let mut branches = Vec::new();

        let local = self.local.clone();
        let local_query = query.to_string();
        branches.push(self.spawn_branch(async move {
            local.search(&local_query, top_k).await
        }));

        if use_external {
            for source in self.external.source_names() {
                let external = self.external.clone();
                let ext_query = query.to_string();
                let ext_source = source.clone();
                labels.push(source);
                branches.push(self.spawn_branch(async move {
                    external
                        .search_with_cache(&ext_source, &ext_query, top_k)
                        .await
                }));
            }
        }

        let mut merged: Vec<SearchResult> = Vec::new();
        for (label, outcome) in labels.iter().zip(join_all(branches).await) {
            match outcome {
                Ok(Ok(results)) => merged.extend(results),
                Ok(Err(_)) => {
                    tracing::warn!("Branch {} timed out after {:?}", label, self.branch_timeout);
                }
                Err(e) => {
                    tracing::warn!("Branch {} failed: {}", label, e);
                }
            }
        }

        let weights = self.load_weights(area);
        scoring::apply_weights(&mut merged, &weights);
        scoring::rank(&mut merged);
        merged.truncate(top_k);

        self.report_usage(&merged);
        merged
    }

    /// Run one branch as a task under the per-branch deadline. The join
    /// outcome distinguishes timeouts from panics; both are excluded from
    /// the merge.
    fn spawn_branch(
        &self,
        fut: impl std::future::Future<Output = Vec<SearchResult>> + Send + 'static,
    ) -> JoinHandle<Result<Vec<SearchResult>, Elapsed>> {
        tokio::spawn(tokio::time::timeout(self.branch_timeout, fut))
    }

    fn load_weights(&self, area: Option<&str>) -> SourceWeights {
        match self.weights.source_weights(area) {
            Ok(weights) => weights,
            Err(e) => {
                tracing::warn!("Failed to load source weights: {}", e);
                SourceWeights::new()
            }
        }
    }

    /// One usage event per distinct source in the final ranking, carrying
    /// that source's best adjusted score.
    fn report_usage(&self, results: &[SearchResult]) {
        let Some(sender) = &self.telemetry else {
            return;
        };
        let mut seen: Vec<&str> = Vec::new();
        for result in results {
            if seen.contains(&result.source_type.as_str()) {
                continue;
            }
            seen.push(&result.source_type);
            sender.send(TelemetryEvent::SourceUsage {
                source_name: result.source_type.clone(),
                adjusted_score: result.adjusted_score as f64,
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::testutil::{hit_for_source, MockEmbedder, MockVectorStore};
    use crate::knowledge::{ExternalCache, KnowledgeBase};
    use crate::scraper::{RawItem, ScrapeError, SourceRegistry, SourceScraper};
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticWeights(SourceWeights);

    impl WeightProvider for StaticWeights {
        fn source_weights(&self, _area: Option<&str>) -> anyhow::Result<SourceWeights> {
            Ok(self.0.clone())
        }
    }

    /// Scraper returning a single item with the given title.
    struct FixedScraper {
        source: String,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SourceScraper for FixedScraper {
        fn name(&self) -> &str {
            &self.source
        }

        async fn search(&self, _q: &str, _n: usize) -> Result<Vec<RawItem>, ScrapeError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(vec![json!({ "titulo": format!("doc {}", self.source) })
                .as_object()
                .cloned()
                .unwrap()])
        }
    }

    fn render_titulo(item: &RawItem) -> String {
        item.get("titulo")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    struct Fixture {
        store: Arc<MockVectorStore>,
        local: Arc<LocalRetriever>,
        external: Arc<ExternalRetriever>,
    }

    fn fixture(sources: Vec<FixedScraper>) -> Fixture {
        let store = Arc::new(MockVectorStore::new());
        let kb = Arc::new(KnowledgeBase::new(store.clone(), Arc::new(MockEmbedder)));
        let local = Arc::new(LocalRetriever::with_collections(
            kb.clone(),
            vec![
                "practica_forense".to_string(),
                "libros".to_string(),
                "jurisprudencia".to_string(),
            ],
        ));

        let mut registry = SourceRegistry::new();
        for scraper in sources {
            registry.register(Arc::new(scraper), render_titulo);
        }
        let cache = Arc::new(ExternalCache::new(kb, 3600));
        let external = Arc::new(ExternalRetriever::new(cache, Arc::new(registry)));

        Fixture {
            store,
            local,
            external,
        }
    }

    fn orchestrator(fixture: &Fixture, weights: SourceWeights) -> SearchOrchestrator {
        SearchOrchestrator::new(
            fixture.local.clone(),
            fixture.external.clone(),
            Arc::new(StaticWeights(weights)),
        )
    }

    fn script_three_collections(store: &MockVectorStore) {
        store.script(
            "practica_forense",
            vec![
                hit_for_source("pf1", "pf uno", "practica_forense", 0.90),
                hit_for_source("pf2", "pf dos", "practica_forense", 0.85),
            ],
        );
        store.script(
            "libros",
            vec![
                hit_for_source("li1", "libro uno", "libros", 0.88),
                hit_for_source("li2", "libro dos", "libros", 0.83),
            ],
        );
        store.script(
            "jurisprudencia",
            vec![
                hit_for_source("ju1", "fallo uno", "jurisprudencia", 0.86),
                hit_for_source("ju2", "fallo dos", "jurisprudencia", 0.84),
            ],
        );
    }

    #[tokio::test]
    async fn test_merged_ranking_with_unit_weights() {
        let fx = fixture(vec![
            FixedScraper {
                source: "pjud".to_string(),
                delay: None,
            },
            FixedScraper {
                source: "bcn".to_string(),
                delay: None,
            },
        ]);
        script_three_collections(&fx.store);

        let orch = orchestrator(&fx, SourceWeights::new());
        let results = orch.execute("contrato de arriendo", 5, true, None).await;

        let scores: Vec<f32> = results.iter().map(|r| r.adjusted_score).collect();
        let expected: [f32; 5] = [0.90, 0.88, 0.86, 0.85, 0.84];
        assert_eq!(scores.len(), 5);
        for (got, want) in scores.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6, "got {:?}", scores);
        }
    }

    #[tokio::test]
    async fn test_local_only_skips_external_sources() {
        let fx = fixture(vec![FixedScraper {
            source: "pjud".to_string(),
            delay: None,
        }]);
        script_three_collections(&fx.store);

        let orch = orchestrator(&fx, SourceWeights::new());
        let results = orch.execute("arriendo", 10, false, None).await;

        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.source_type != "pjud"));
    }

    #[tokio::test]
    async fn test_zero_top_k_dispatches_nothing() {
        let fx = fixture(vec![]);
        script_three_collections(&fx.store);

        let orch = orchestrator(&fx, SourceWeights::new());
        let results = orch.execute("arriendo", 0, true, None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_slow_branch_excluded_others_survive() {
        let fx = fixture(vec![
            FixedScraper {
                source: "pjud".to_string(),
                delay: Some(Duration::from_secs(5)),
            },
            FixedScraper {
                source: "bcn".to_string(),
                delay: None,
            },
        ]);

        let orch = orchestrator(&fx, SourceWeights::new())
            .with_branch_timeout(Duration::from_millis(50));
        let results = orch.execute("ley", 10, true, None).await;

        assert!(results.iter().any(|r| r.source_type == "bcn"));
        assert!(results.iter().all(|r| r.source_type != "pjud"));
    }

    #[tokio::test]
    async fn test_failing_collection_does_not_sink_query() {
        let fx = fixture(vec![]);
        fx.store.fail("practica_forense");
        fx.store.script(
            "libros",
            vec![hit_for_source("li1", "libro uno", "libros", 0.70)],
        );

        let orch = orchestrator(&fx, SourceWeights::new());
        let results = orch.execute("arriendo", 5, false, None).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_type, "libros");
    }

    #[tokio::test]
    async fn test_weights_reorder_final_ranking() {
        let fx = fixture(vec![]);
        fx.store.script(
            "libros",
            vec![hit_for_source("li1", "libro", "libros", 0.80)],
        );
        fx.store.script(
            "jurisprudencia",
            vec![hit_for_source("ju1", "fallo", "jurisprudencia", 0.70)],
        );

        let mut weights = SourceWeights::new();
        weights.insert("jurisprudencia".to_string(), 2.0);

        let orch = orchestrator(&fx, SourceWeights::new());
        let baseline = orch.execute("q", 5, false, None).await;
        assert_eq!(baseline[0].source_type, "libros");

        let orch = orchestrator(&fx, weights);
        let reweighted = orch.execute("q", 5, false, None).await;
        assert_eq!(reweighted[0].source_type, "jurisprudencia");
        assert!((reweighted[0].adjusted_score - 1.4).abs() < 1e-6);
    }
}
