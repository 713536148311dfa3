//! Candidate retrieval and relevance ranking.
//!
//! Planned strategies and the optional vector source run concurrently, their
//! ranked lists merge through Reciprocal Rank Fusion, and each fused
//! candidate is scored by a fixed inventory of relevance signals before
//! sorting and pagination.

mod fusion;
mod reranker;
mod retriever;
mod signals;
mod snippet;

pub use fusion::{fuse, FusionRecord};
pub use reranker::{Reranker, ScoredCandidate};
pub use retriever::CandidateRetriever;
pub use signals::{Signal, SignalComputer, SignalSet};
pub use snippet::{highlight_terms, select_passage};

use crate::decision::DecisionId;

/// One retrieval source's ranked candidate list.
#[derive(Debug, Clone)]
pub struct SourceHits {
    /// Stable source identifier (strategy id or `"vector"`)
    pub source_id: &'static str,

    /// Trust weight applied to every rank contribution from this source
    pub weight: f32,

    /// Candidates in source rank order, with the source's native score
    pub hits: Vec<(DecisionId, f32)>,
}

impl SourceHits {
    pub fn new(source_id: &'static str, weight: f32, hits: Vec<(DecisionId, f32)>) -> Self {
        Self {
            source_id,
            weight,
            hits,
        }
    }

    /// A source that ran but found nothing. Contributes nothing to fusion.
    pub fn empty(source_id: &'static str, weight: f32) -> Self {
        Self::new(source_id, weight, Vec::new())
    }
}
