//! The search engine: composition root and request pipeline.
//!
//! `SearchEngine::open` wires the corpus collaborators together once;
//! `search` runs the per-request pipeline: classify, expand, plan, retrieve
//! concurrently, fuse, hydrate, score, rank, paginate.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use ahash::AHashMap;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::config::{ConfigValidator, EngineConfig};
use crate::decision::{Decision, DecisionId, DecisionKey, RankedResult, SearchResponse};
use crate::error::{IudexError, Result};
use crate::index::{TextIndex, VectorIndex};
use crate::query::{
    normalize_docket, plan_strategies, HttpTermSuggester, Intent, Pagination, Query,
    QueryExpander, SearchRequest, TermSuggester,
};
use crate::retrieval::{
    fuse, highlight_terms, CandidateRetriever, FusionRecord, Reranker, ScoredCandidate,
    SignalComputer,
};
use crate::semantic::ModelProvider;
use crate::store::{CitationGraph, DecisionStore};

/// Citation-graph degradation is logged once per process, not per request.
static CITATION_WARN: Once = Once::new();

/// Shared, read-only search engine over an indexed decision corpus.
///
/// One instance serves arbitrarily many concurrent `search` calls; all
/// per-request state lives on the request's own stack.
pub struct SearchEngine {
    config: EngineConfig,
    store: Arc<DecisionStore>,
    citations: Option<Arc<CitationGraph>>,
    retriever: CandidateRetriever,
    reranker: Reranker,
    expander: QueryExpander,
}

impl SearchEngine {
    /// Open the engine over an existing corpus. The text index and the
    /// decision store are mandatory; the vector index, citation graph, and
    /// LLM suggester attach per config and individually fall back to absent.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let models = Arc::new(ModelProvider::new(
            config.semantic.clone(),
            config.rerank.clone(),
        ));
        Self::open_with_models(config, models)
    }

    /// Open the engine with a caller-supplied model provider.
    ///
    /// Embedded deployments can share one provider across engines; tests use
    /// this to stub the embedder instead of loading ONNX models.
    pub fn open_with_models(config: EngineConfig, models: Arc<ModelProvider>) -> Result<Self> {
        ConfigValidator::validate(&config)?;

        let index_dir = expand_tilde(&config.index.dir);
        let text_index = TextIndex::open_read(index_dir)
            .map_err(|e| IudexError::corpus("text-index", e.to_string()))?;
        let text_index = Arc::new(text_index);

        let db_path = expand_tilde(&config.store.db_path);
        let store = Arc::new(DecisionStore::open_read_only(
            &db_path,
            config.store.pool_size,
        )?);
        match store.count() {
            Ok(count) => info!(decisions = count, "decision store opened"),
            Err(error) => warn!(error = %error, "decision store count unavailable"),
        }

        let citations = Self::open_citations(&config, &db_path);

        let vector_index = if config.semantic.enabled {
            match Self::build_vector_index(&config, &store) {
                Ok(index) => index.map(Arc::new),
                Err(error) => {
                    warn!(error = %error, "vector index unavailable, semantic retrieval disabled");
                    None
                }
            }
        } else {
            None
        };

        let suggester: Option<Arc<dyn TermSuggester>> = if config.expansion.llm_enabled {
            Some(Arc::new(HttpTermSuggester::new(&config.expansion)))
        } else {
            None
        };
        let expander = QueryExpander::new(suggester);

        let retriever = CandidateRetriever::new(
            &config,
            text_index,
            vector_index,
            Arc::clone(&models),
        );
        let reranker = Reranker::new(config.signals.clone(), config.rerank.clone(), models);

        info!("search engine ready");
        Ok(Self {
            config,
            store,
            citations,
            retriever,
            reranker,
            expander,
        })
    }

    fn open_citations(config: &EngineConfig, store_db: &Path) -> Option<Arc<CitationGraph>> {
        if !config.citations.enabled {
            return None;
        }
        let path = match &config.citations.db_path {
            Some(path) => expand_tilde(path),
            None => store_db.with_file_name("citations.db"),
        };
        match CitationGraph::open_read_only(&path, config.store.pool_size) {
            Ok(graph) => {
                info!(path = %path.display(), "citation graph attached");
                Some(Arc::new(graph))
            }
            Err(error) => {
                CITATION_WARN.call_once(|| {
                    warn!(error = %error, "citation graph unavailable, statute boost disabled");
                });
                None
            }
        }
    }

    fn build_vector_index(
        config: &EngineConfig,
        store: &DecisionStore,
    ) -> Result<Option<VectorIndex>> {
        let semantic = &config.semantic;
        let embeddings = store.embeddings(&semantic.model)?;
        if embeddings.is_empty() {
            info!(model = %semantic.model, "no stored embeddings, semantic retrieval disabled");
            return Ok(None);
        }

        let index = VectorIndex::new(
            semantic.vector_dim,
            semantic.max_elements.max(embeddings.len()),
            semantic.hnsw_ef_construction,
            semantic.hnsw_m,
        );
        let mut loaded = 0usize;
        for (id, vector) in &embeddings {
            match index.insert(*id, vector) {
                Ok(()) => loaded += 1,
                Err(error) => warn!(decision_id = *id, error = %error, "skipping embedding"),
            }
        }
        info!(
            loaded,
            dimension = semantic.vector_dim,
            "vector index rebuilt from stored embeddings"
        );
        Ok(Some(index))
    }

    /// Run a ranked search.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("search", request_id = %request_id);
        self.search_inner(request).instrument(span).await
    }

    async fn search_inner(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if request.text.trim().is_empty() {
            return Err(IudexError::validation("text", "Query text cannot be empty"));
        }
        let page = self.pagination(request)?;

        let mut query = Query::from_request(request, page);
        if let Intent::DocketLookup { normalized } = query.intent.clone() {
            let found = self
                .store
                .get_by_docket(&normalized)
                .map_err(store_unavailable)?;
            match found {
                Some(decision) if query.filters.matches(&decision) => {
                    debug!(docket = %normalized, "docket fast path hit");
                    return Ok(self.docket_response(&query, decision));
                }
                _ => debug!(docket = %normalized, "docket fast path missed, searching as text"),
            }
            query = query.into_natural();
        }

        let expansions = match query.intent {
            Intent::NaturalLanguage => self.expander.expand(&query).await,
            _ => Vec::new(),
        };

        let strategies = plan_strategies(&query, &expansions, &self.config.fusion);
        let sources = self.retriever.retrieve(&query, strategies).await?;

        // vector similarities are also a signal, keyed per candidate
        let vector_scores: AHashMap<DecisionId, f32> = sources
            .iter()
            .filter(|s| s.source_id == "vector")
            .flat_map(|s| s.hits.iter().copied())
            .collect();

        let pool = fuse(sources, self.config.fusion.rrf_k);
        if pool.is_empty() {
            return Ok(SearchResponse {
                results: Vec::new(),
                total: 0,
            });
        }

        let ids: Vec<DecisionId> = pool.keys().copied().collect();
        let decisions = self.store.get_batch(&ids).map_err(store_unavailable)?;

        let (statute_citers, incoming) = self.citation_lookups(&query, &ids);
        let computer = SignalComputer::new(&query, &self.config.snippet)
            .with_citations(statute_citers, incoming)
            .with_vector_scores(vector_scores);

        let mut candidates: Vec<ScoredCandidate> = Vec::with_capacity(decisions.len());
        for decision in decisions {
            if !query.filters.matches(&decision) {
                continue;
            }
            let record = match pool.get(&decision.id) {
                Some(record) => *record,
                None => continue,
            };
            let (signals, snippet) = computer.compute(&decision, &record);
            candidates.push(ScoredCandidate {
                decision,
                signals,
                snippet,
                source_hits: record.source_hits,
                score: 0.0,
            });
        }

        self.reranker.rank(&query, &mut candidates).await;

        let total = candidates.len();
        let offset = query.page.offset.min(total);
        let end = (offset + query.page.limit).min(total);
        let terms = query.distinct_terms();

        let mut results = Vec::with_capacity(end - offset);
        for (i, candidate) in candidates[offset..end].iter().enumerate() {
            let snippet = if self.config.snippet.highlight {
                highlight_terms(&candidate.snippet, &terms)
            } else {
                candidate.snippet.clone()
            };
            results.push(RankedResult::new(
                &candidate.decision,
                candidate.score,
                offset + i + 1,
                snippet,
                candidate.signals.clone(),
                candidate.source_hits,
            ));
        }

        debug!(total, returned = results.len(), "search complete");
        Ok(SearchResponse { results, total })
    }

    /// Exact decision lookup bypassing ranking.
    pub fn get(&self, key: &DecisionKey) -> Result<Option<Decision>> {
        let found = match key {
            DecisionKey::Id(id) => self.store.get_by_id(*id),
            DecisionKey::Docket(docket) => self.store.get_by_docket(&normalize_docket(docket)),
        };
        found.map_err(store_unavailable)
    }

    /// The engine's effective configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn docket_response(&self, query: &Query, decision: Decision) -> SearchResponse {
        let computer = SignalComputer::new(query, &self.config.snippet);
        let (signals, snippet) = computer.compute(&decision, &FusionRecord::default());
        let score = signals.composite(&self.config.signals);
        let result = RankedResult::new(&decision, score, 1, snippet, signals, 1);
        SearchResponse {
            results: vec![result],
            total: 1,
        }
    }

    fn citation_lookups(
        &self,
        query: &Query,
        ids: &[DecisionId],
    ) -> (AHashMap<DecisionId, u32>, AHashMap<DecisionId, u32>) {
        let graph = match &self.citations {
            Some(graph) => graph,
            None => return (AHashMap::new(), AHashMap::new()),
        };
        let statute = match &query.statute {
            Some(statute) => statute,
            None => return (AHashMap::new(), AHashMap::new()),
        };

        let citers = match graph.statute_citers(&statute.key) {
            Ok(citers) => citers,
            Err(error) => {
                CITATION_WARN.call_once(|| {
                    warn!(error = %error, "citation graph lookup failed, statute boost disabled");
                });
                return (AHashMap::new(), AHashMap::new());
            }
        };
        let incoming = match graph.incoming_counts(ids) {
            Ok(incoming) => incoming,
            Err(error) => {
                CITATION_WARN.call_once(|| {
                    warn!(error = %error, "citation count lookup failed");
                });
                AHashMap::new()
            }
        };
        (citers, incoming)
    }

    fn pagination(&self, request: &SearchRequest) -> Result<Pagination> {
        let limit = if request.limit == 0 {
            self.config.engine.default_page_size
        } else {
            request.limit
        };
        if limit > self.config.engine.max_page_size {
            return Err(IudexError::validation(
                "limit",
                format!(
                    "limit must be at most {}",
                    self.config.engine.max_page_size
                ),
            ));
        }
        Ok(Pagination {
            limit,
            offset: request.offset,
        })
    }
}

/// Store errors at the serving boundary mean the corpus is unreachable.
fn store_unavailable(error: IudexError) -> IudexError {
    match error {
        IudexError::Database(e) => IudexError::corpus("decision-store", e.to_string()),
        other => other,
    }
}

/// Expand tilde in path
fn expand_tilde(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~").unwrap_or(path));
        }
    }
    path.to_path_buf()
}
