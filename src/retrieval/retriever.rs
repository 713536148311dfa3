//! Concurrent execution of retrieval sources.
//!
//! Every planned strategy, plus the vector source when semantic search is
//! enabled, runs as its own task under a shared semaphore and one
//! per-request deadline. Failures stay per-source: a rejected or failed
//! source is dropped and the rest of the request proceeds.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::SourceHits;
use crate::config::EngineConfig;
use crate::error::{IudexError, Result};
use crate::index::{TextIndex, TextIndexError, VectorIndex};
use crate::query::{Query, QueryStrategy};
use crate::semantic::ModelProvider;

/// Why one retrieval source produced no hits. Absorbed inside the pipeline;
/// only the zero-source outcomes escalate to request errors.
#[derive(Debug, Error)]
enum SourceFailure {
    #[error("source {source_id}: query rejected: {message}")]
    Parse {
        source_id: &'static str,
        message: String,
    },

    #[error("source {source_id}: search failed: {message}")]
    Index {
        source_id: &'static str,
        message: String,
    },

    #[error("source {source_id}: {message}")]
    Auxiliary {
        source_id: &'static str,
        message: String,
    },
}

impl SourceFailure {
    /// True when the failure points at the primary text index rather than a
    /// malformed strategy or an optional subsystem.
    fn implicates_corpus(&self) -> bool {
        matches!(self, SourceFailure::Index { .. })
    }
}

/// Fans a request out across retrieval sources and collects whatever
/// completed before the deadline.
pub struct CandidateRetriever {
    text_index: Arc<TextIndex>,
    vector_index: Option<Arc<VectorIndex>>,
    models: Arc<ModelProvider>,
    request_deadline: Duration,
    max_concurrent_sources: usize,
    candidate_pool_size: usize,
    semantic_enabled: bool,
    vector_weight: f32,
    hnsw_ef_search: usize,
}

impl CandidateRetriever {
    pub fn new(
        config: &EngineConfig,
        text_index: Arc<TextIndex>,
        vector_index: Option<Arc<VectorIndex>>,
        models: Arc<ModelProvider>,
    ) -> Self {
        Self {
            text_index,
            vector_index,
            models,
            request_deadline: Duration::from_millis(config.engine.request_deadline_ms),
            max_concurrent_sources: config.engine.max_concurrent_sources.max(1),
            candidate_pool_size: config.engine.candidate_pool_size,
            semantic_enabled: config.semantic.enabled,
            vector_weight: config.fusion.vector_weight,
            hnsw_ef_search: config.semantic.hnsw_ef_search,
        }
    }

    /// Run all sources for the query and return the lists that completed in
    /// time. Errors only when nothing completed at all: `Timeout` when the
    /// deadline expired first, `CorpusUnavailable` when the text index
    /// itself failed. An empty `Ok` simply means no source matched.
    pub async fn retrieve(
        &self,
        query: &Query,
        strategies: Vec<QueryStrategy>,
    ) -> Result<Vec<SourceHits>> {
        let started = Instant::now();
        let deadline = started + self.request_deadline;

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_sources));
        let mut tasks: JoinSet<std::result::Result<SourceHits, SourceFailure>> = JoinSet::new();

        for strategy in strategies {
            self.spawn_text_source(&mut tasks, &semaphore, strategy, query);
        }
        self.spawn_vector_source(&mut tasks, &semaphore, query);

        let mut completed: Vec<SourceHits> = Vec::new();
        let mut failures: Vec<SourceFailure> = Vec::new();
        let mut deadline_hit = false;

        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(Ok(hits)))) => completed.push(hits),
                Ok(Some(Ok(Err(failure)))) => failures.push(failure),
                Ok(Some(Err(join_error))) => {
                    warn!(error = %join_error, "retrieval task did not complete");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        self.log_failures(&failures);

        if completed.is_empty() {
            if deadline_hit {
                return Err(IudexError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            if let Some(failure) = failures.iter().find(|f| f.implicates_corpus()) {
                return Err(IudexError::corpus("text-index", failure.to_string()));
            }
        }

        Ok(completed)
    }

    fn spawn_text_source(
        &self,
        tasks: &mut JoinSet<std::result::Result<SourceHits, SourceFailure>>,
        semaphore: &Arc<Semaphore>,
        strategy: QueryStrategy,
        query: &Query,
    ) {
        let index = Arc::clone(&self.text_index);
        let semaphore = Arc::clone(semaphore);
        let filters = query.filters.clone();
        let limit = self.candidate_pool_size;

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| SourceFailure::Auxiliary {
                    source_id: strategy.id,
                    message: e.to_string(),
                })?;

            match index.search(&strategy.query, &filters, limit) {
                Ok(hits) => Ok(SourceHits::new(strategy.id, strategy.weight, hits)),
                Err(TextIndexError::QueryParse(message)) => Err(SourceFailure::Parse {
                    source_id: strategy.id,
                    message,
                }),
                Err(error) => Err(SourceFailure::Index {
                    source_id: strategy.id,
                    message: error.to_string(),
                }),
            }
        });
    }

    fn spawn_vector_source(
        &self,
        tasks: &mut JoinSet<std::result::Result<SourceHits, SourceFailure>>,
        semaphore: &Arc<Semaphore>,
        query: &Query,
    ) {
        if !self.semantic_enabled || query.tokens.is_empty() {
            return;
        }
        let vector_index = match &self.vector_index {
            Some(index) => Arc::clone(index),
            None => return,
        };

        let models = Arc::clone(&self.models);
        let semaphore = Arc::clone(semaphore);
        let text = query.normalized.clone();
        let weight = self.vector_weight;
        let k = self.candidate_pool_size;
        let ef_search = self.hnsw_ef_search;

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| SourceFailure::Auxiliary {
                    source_id: "vector",
                    message: e.to_string(),
                })?;

            let embedder = match models.embedder().await {
                Some(embedder) => embedder,
                // model unavailable, the source simply contributes nothing
                None => return Ok(SourceHits::empty("vector", weight)),
            };

            let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text))
                .await
                .map_err(|e| SourceFailure::Auxiliary {
                    source_id: "vector",
                    message: e.to_string(),
                })?
                .map_err(|e| SourceFailure::Auxiliary {
                    source_id: "vector",
                    message: e.to_string(),
                })?;

            match vector_index.search(&embedding, k, ef_search) {
                Ok(results) => Ok(SourceHits::new(
                    "vector",
                    weight,
                    results.into_iter().map(|r| (r.id, r.score)).collect(),
                )),
                Err(error) => Err(SourceFailure::Auxiliary {
                    source_id: "vector",
                    message: error.to_string(),
                }),
            }
        });
    }

    /// Log each distinct failure cause once. Parse rejections are expected
    /// for odd inputs and stay at debug.
    fn log_failures(&self, failures: &[SourceFailure]) {
        let mut seen: AHashSet<String> = AHashSet::new();
        for failure in failures {
            let message = failure.to_string();
            if !seen.insert(message.clone()) {
                continue;
            }
            match failure {
                SourceFailure::Parse { .. } => debug!("{message}"),
                _ => warn!("{message}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Decision;
    use crate::query::{Pagination, SearchRequest};
    use crate::semantic::{EmbeddingError, EmbeddingProvider};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn decision(id: i64, title: &str, text: &str) -> Decision {
        Decision {
            id,
            docket_number: format!("4A_{}/2024", id),
            court: "BGer".to_string(),
            canton: "CH".to_string(),
            chamber: "4A".to_string(),
            language: "de".to_string(),
            decision_type: "urteil".to_string(),
            decision_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            title: title.to_string(),
            regeste: String::new(),
            full_text: text.to_string(),
        }
    }

    fn text_corpus() -> (TempDir, Arc<TextIndex>) {
        let dir = TempDir::new().unwrap();
        let mut index = TextIndex::new(dir.path().join("idx")).unwrap();
        index
            .add_decision(
                &decision(1, "Kündigung des Mietvertrags", "Der Mietvertrag wurde gekündigt."),
                &[],
            )
            .unwrap();
        index
            .add_decision(
                &decision(2, "Kaufvertrag und Gewährleistung", "Mängel der Kaufsache."),
                &[],
            )
            .unwrap();
        index.commit().unwrap();
        (dir, Arc::new(index))
    }

    fn query(text: &str) -> Query {
        Query::from_request(
            &SearchRequest::new(text),
            Pagination {
                limit: 10,
                offset: 0,
            },
        )
    }

    fn strategy(id: &'static str, text: &str, weight: f32) -> QueryStrategy {
        QueryStrategy {
            id,
            query: text.to_string(),
            weight,
        }
    }

    fn retriever(config: EngineConfig, index: Arc<TextIndex>) -> CandidateRetriever {
        let models = Arc::new(ModelProvider::new(
            config.semantic.clone(),
            config.rerank.clone(),
        ));
        CandidateRetriever::new(&config, index, None, models)
    }

    #[tokio::test]
    async fn test_strategies_fan_out_and_return_hits() {
        let (_dir, index) = text_corpus();
        let mut config = EngineConfig::default();
        config.semantic.enabled = false;
        let retriever = retriever(config, index);

        let sources = retriever
            .retrieve(
                &query("kündigung mietvertrag"),
                vec![
                    strategy("and", "+kundigung +mietvertrags", 1.4),
                    strategy("or", "kundigung mietvertrags kaufvertrag", 0.6),
                ],
            )
            .await
            .unwrap();

        assert_eq!(sources.len(), 2);
        let or_source = sources.iter().find(|s| s.source_id == "or").unwrap();
        assert!(or_source.hits.len() >= 2);
    }

    #[tokio::test]
    async fn test_parse_failure_drops_only_that_source() {
        let (_dir, index) = text_corpus();
        let mut config = EngineConfig::default();
        config.semantic.enabled = false;
        let retriever = retriever(config, index);

        let sources = retriever
            .retrieve(
                &query("kündigung"),
                vec![
                    strategy("and", "+kundigung", 1.4),
                    strategy("explicit", "decision_date:[neither TO", 1.0),
                ],
            )
            .await
            .unwrap();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_id, "and");
    }

    #[tokio::test]
    async fn test_all_sources_rejected_is_empty_ok() {
        let (_dir, index) = text_corpus();
        let mut config = EngineConfig::default();
        config.semantic.enabled = false;
        let retriever = retriever(config, index);

        let sources = retriever
            .retrieve(
                &query("kündigung"),
                vec![strategy("explicit", "decision_date:[neither TO", 1.0)],
            )
            .await
            .unwrap();

        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn test_no_sources_is_empty_ok() {
        let (_dir, index) = text_corpus();
        let mut config = EngineConfig::default();
        config.semantic.enabled = false;
        let retriever = retriever(config, index);

        let sources = retriever.retrieve(&query("kündigung"), vec![]).await.unwrap();
        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_with_nothing_completed_times_out() {
        let (_dir, index) = text_corpus();
        let mut config = EngineConfig::default();
        config.semantic.enabled = false;
        config.engine.request_deadline_ms = 0;
        let retriever = retriever(config, index);

        let result = retriever
            .retrieve(&query("kündigung"), vec![strategy("and", "+kundigung", 1.4)])
            .await;

        assert!(matches!(result, Err(IudexError::Timeout { .. })));
    }

    struct AxisEmbedder;

    impl EmbeddingProvider for AxisEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }

        fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    #[tokio::test]
    async fn test_vector_source_ranks_by_similarity() {
        let (_dir, index) = text_corpus();
        let mut config = EngineConfig::default();
        config.semantic.enabled = true;

        let vector_index = Arc::new(VectorIndex::new(4, 100, 200, 16));
        vector_index.insert(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        vector_index.insert(2, &[0.0, 1.0, 0.0, 0.0]).unwrap();

        let models = Arc::new(ModelProvider::with_embedder(
            config.semantic.clone(),
            config.rerank.clone(),
            Arc::new(AxisEmbedder),
        ));
        let retriever = CandidateRetriever::new(&config, index, Some(vector_index), models);

        let sources = retriever
            .retrieve(&query("mietrecht kündigung"), vec![])
            .await
            .unwrap();

        let vector = sources.iter().find(|s| s.source_id == "vector").unwrap();
        assert!(!vector.hits.is_empty());
        assert_eq!(vector.hits[0].0, 1);
        assert!(vector.hits[0].1 > 0.9);
    }
}
