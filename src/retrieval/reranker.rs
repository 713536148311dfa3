//! Ordering of the fused, signal-scored pool.
//!
//! The composite score is the weighted signal sum; ordering is deterministic
//! through an ascending-id tie-break. When enabled and the model is
//! available, a cross-encoder re-scores the top of the relevance order; any
//! failure there leaves the signal order standing.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use super::signals::SignalSet;
use crate::config::{RerankSection, SignalWeights};
use crate::decision::Decision;
use crate::query::{Query, SortOrder};
use crate::semantic::ModelProvider;

/// A hydrated candidate with its computed ranking state.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub decision: Decision,
    pub signals: SignalSet,
    pub snippet: String,
    pub source_hits: u32,
    pub score: f32,
}

/// Scores and orders candidate pools.
pub struct Reranker {
    weights: SignalWeights,
    rerank: RerankSection,
    models: Arc<ModelProvider>,
}

impl Reranker {
    pub fn new(weights: SignalWeights, rerank: RerankSection, models: Arc<ModelProvider>) -> Self {
        Self {
            weights,
            rerank,
            models,
        }
    }

    /// Compute composite scores and sort the whole pool in place. Pagination
    /// happens on the sorted pool, never before.
    pub async fn rank(&self, query: &Query, pool: &mut Vec<ScoredCandidate>) {
        for candidate in pool.iter_mut() {
            candidate.score = candidate.signals.composite(&self.weights);
        }

        match query.sort {
            SortOrder::Relevance => {
                pool.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a.decision.id.cmp(&b.decision.id))
                });
                if self.rerank.enabled && pool.len() > 1 {
                    self.rescore_prefix(query, pool).await;
                }
            }
            SortOrder::DateDesc => pool.sort_by(|a, b| {
                b.decision
                    .decision_date
                    .cmp(&a.decision.decision_date)
                    .then_with(|| a.decision.id.cmp(&b.decision.id))
            }),
            SortOrder::DateAsc => pool.sort_by(|a, b| {
                a.decision
                    .decision_date
                    .cmp(&b.decision.decision_date)
                    .then_with(|| a.decision.id.cmp(&b.decision.id))
            }),
        }
    }

    /// Reorder the top of the pool by cross-encoder score. Composite scores
    /// and signals are left untouched, only positions change.
    async fn rescore_prefix(&self, query: &Query, pool: &mut Vec<ScoredCandidate>) {
        let encoder = match self.models.cross_encoder().await {
            Some(encoder) => encoder,
            None => return,
        };

        let n = self.rerank.top_n.min(pool.len());
        if n < 2 {
            return;
        }

        let documents: Vec<String> = pool[..n]
            .iter()
            .map(|candidate| {
                let decision = &candidate.decision;
                if decision.regeste.is_empty() {
                    decision.title.clone()
                } else {
                    format!("{}\n{}", decision.title, decision.regeste)
                }
            })
            .collect();
        let text = query.normalized.clone();

        let outcome =
            tokio::task::spawn_blocking(move || encoder.rescore(&text, &documents)).await;
        let scores = match outcome {
            Ok(Ok(scores)) if scores.len() == n => scores,
            Ok(Ok(_)) => {
                debug!("cross-encoder returned wrong arity, keeping signal order");
                return;
            }
            Ok(Err(error)) => {
                debug!(error = %error, "cross-encoder scoring failed, keeping signal order");
                return;
            }
            Err(error) => {
                debug!(error = %error, "cross-encoder task failed, keeping signal order");
                return;
            }
        };

        let tail = pool.split_off(n);
        let mut rescored: Vec<(f32, ScoredCandidate)> =
            scores.into_iter().zip(pool.drain(..)).collect();
        rescored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.decision.id.cmp(&b.1.decision.id))
        });
        pool.extend(rescored.into_iter().map(|(_, candidate)| candidate));
        pool.extend(tail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::query::{Pagination, SearchRequest};
    use chrono::NaiveDate;

    fn decision(id: i64, date: (i32, u32, u32)) -> Decision {
        Decision {
            id,
            docket_number: format!("4A_{}/2024", id),
            court: "BGer".to_string(),
            canton: "CH".to_string(),
            chamber: "4A".to_string(),
            language: "de".to_string(),
            decision_type: "urteil".to_string(),
            decision_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            title: format!("Entscheid {}", id),
            regeste: String::new(),
            full_text: String::new(),
        }
    }

    fn candidate(id: i64, bm25: f32, date: (i32, u32, u32)) -> ScoredCandidate {
        let mut signals = SignalSet::default();
        signals.bm25 = bm25;
        ScoredCandidate {
            decision: decision(id, date),
            signals,
            snippet: String::new(),
            source_hits: 1,
            score: 0.0,
        }
    }

    fn reranker(config: &EngineConfig) -> Reranker {
        let mut rerank = config.rerank.clone();
        rerank.enabled = false;
        let models = Arc::new(ModelProvider::new(config.semantic.clone(), rerank.clone()));
        Reranker::new(config.signals.clone(), rerank, models)
    }

    fn query(text: &str, sort: SortOrder) -> Query {
        let mut request = SearchRequest::new(text);
        request.sort = sort;
        Query::from_request(
            &request,
            Pagination {
                limit: 10,
                offset: 0,
            },
        )
    }

    #[tokio::test]
    async fn test_relevance_order_with_id_tiebreak() {
        let config = EngineConfig::default();
        let reranker = reranker(&config);

        let mut pool = vec![
            candidate(5, 1.0, (2024, 1, 1)),
            candidate(9, 4.0, (2024, 1, 1)),
            candidate(1, 1.0, (2024, 1, 1)),
        ];
        reranker
            .rank(&query("mietrecht", SortOrder::Relevance), &mut pool)
            .await;

        let ids: Vec<i64> = pool.iter().map(|c| c.decision.id).collect();
        assert_eq!(ids, vec![9, 1, 5]);
        assert!(pool[0].score > pool[1].score);
        assert_eq!(pool[1].score, pool[2].score);
    }

    #[tokio::test]
    async fn test_composite_score_is_recorded_on_candidates() {
        let config = EngineConfig::default();
        let reranker = reranker(&config);

        let mut pool = vec![candidate(1, 2.5, (2024, 1, 1))];
        reranker
            .rank(&query("mietrecht", SortOrder::Relevance), &mut pool)
            .await;

        assert_eq!(pool[0].score, pool[0].signals.composite(&config.signals));
    }

    #[tokio::test]
    async fn test_date_sort_overrides_relevance() {
        let config = EngineConfig::default();
        let reranker = reranker(&config);

        let mut pool = vec![
            candidate(1, 9.0, (2020, 1, 1)),
            candidate(2, 0.1, (2024, 6, 1)),
            candidate(3, 0.1, (2022, 3, 1)),
        ];
        reranker
            .rank(&query("mietrecht", SortOrder::DateDesc), &mut pool)
            .await;
        let ids: Vec<i64> = pool.iter().map(|c| c.decision.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);

        reranker
            .rank(&query("mietrecht", SortOrder::DateAsc), &mut pool)
            .await;
        let ids: Vec<i64> = pool.iter().map(|c| c.decision.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[tokio::test]
    async fn test_weight_change_reorders_without_code_change() {
        let config = EngineConfig::default();

        let make_pool = || {
            let mut lexical = candidate(1, 6.0, (2024, 1, 1));
            lexical.signals.title_phrase = 0.0;
            let mut phrased = candidate(2, 1.0, (2024, 1, 1));
            phrased.signals.title_phrase = 1.0;
            vec![lexical, phrased]
        };

        let mut weights = config.signals.clone();
        weights.bm25 = 1.0;
        weights.title_phrase = 0.1;
        let mut rerank = config.rerank.clone();
        rerank.enabled = false;
        let models = Arc::new(ModelProvider::new(config.semantic.clone(), rerank.clone()));
        let bm25_heavy = Reranker::new(weights.clone(), rerank.clone(), Arc::clone(&models));

        let mut pool = make_pool();
        bm25_heavy
            .rank(&query("mietrecht", SortOrder::Relevance), &mut pool)
            .await;
        assert_eq!(pool[0].decision.id, 1);

        weights.title_phrase = 100.0;
        let phrase_heavy = Reranker::new(weights, rerank, models);
        let mut pool = make_pool();
        phrase_heavy
            .rank(&query("mietrecht", SortOrder::Relevance), &mut pool)
            .await;
        assert_eq!(pool[0].decision.id, 2);
    }
}
