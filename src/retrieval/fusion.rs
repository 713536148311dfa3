//! Reciprocal Rank Fusion over per-source candidate lists.

use ahash::AHashMap;

use super::SourceHits;
use crate::decision::DecisionId;

/// Accumulated fusion state for one candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FusionRecord {
    /// Sum of weight / (k + rank) over every source that returned the decision
    pub rrf_score: f32,

    /// Number of sources that returned the decision
    pub source_hits: u32,

    /// Highest native score any source reported. Kept for the bm25 signal,
    /// never added into the RRF sum.
    pub best_native_score: f32,
}

/// Merge ranked source lists into one candidate pool.
///
/// RRF formula, per source: score(id) += weight / (k + rank), rank 1-based.
///
/// Sources are sorted by id before accumulation. Float addition is not
/// associative, so a canonical order is what makes the same source lists
/// produce a byte-identical pool no matter which source completed first.
pub fn fuse(mut sources: Vec<SourceHits>, k: f32) -> AHashMap<DecisionId, FusionRecord> {
    sources.sort_by(|a, b| a.source_id.cmp(b.source_id));

    let mut pool: AHashMap<DecisionId, FusionRecord> = AHashMap::new();
    for source in &sources {
        for (rank, (decision_id, native_score)) in source.hits.iter().enumerate() {
            let record = pool.entry(*decision_id).or_default();
            record.rrf_score += source.weight / (k + (rank as f32) + 1.0);
            record.source_hits += 1;
            if *native_score > record.best_native_score {
                record.best_native_score = *native_score;
            }
        }
    }

    pool
}
