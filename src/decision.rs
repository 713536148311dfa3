//! Core decision records and ranked output types.
//!
//! `Decision` rows are externally owned and read-only at serving time; every
//! other type here is request-scoped and discarded with the response.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::retrieval::SignalSet;

/// Identifier of a decision in the corpus (sqlite rowid domain).
pub type DecisionId = i64;

/// A court decision as stored in the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Corpus identifier
    pub id: DecisionId,

    /// Official case identifier as assigned by the court, e.g. `6B_1234/2025`
    pub docket_number: String,

    /// Court code, e.g. `BGer`, `BVGer`, `BStGer`
    pub court: String,

    /// Canton code for cantonal decisions, e.g. `ZH`; federal courts use `CH`
    pub canton: String,

    /// Chamber or division within the court
    pub chamber: String,

    /// Decision language, ISO-639-1 lowercase (`de`, `fr`, `it`, `rm`, `en`)
    pub language: String,

    /// Decision type, e.g. `urteil`, `beschluss`, `verfügung`
    pub decision_type: String,

    /// Date the decision was issued
    pub decision_date: NaiveDate,

    /// Case title
    pub title: String,

    /// Regeste / headnote: official short summary of the legal holding
    pub regeste: String,

    /// Full decision text
    pub full_text: String,
}

/// Key for exact decision lookup, bypassing ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionKey {
    Id(DecisionId),
    Docket(String),
}

impl std::fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKey::Id(id) => write!(f, "id:{}", id),
            DecisionKey::Docket(docket) => write!(f, "docket:{}", docket),
        }
    }
}

/// One ranked search hit: decision display fields, the composite score, the
/// per-signal breakdown it was computed from, and the selected snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    /// Corpus identifier
    pub decision_id: DecisionId,

    /// Official case identifier
    pub docket_number: String,

    /// Court code
    pub court: String,

    /// Canton code
    pub canton: String,

    /// Chamber or division
    pub chamber: String,

    /// Decision language
    pub language: String,

    /// Decision type
    pub decision_type: String,

    /// Date the decision was issued
    pub decision_date: NaiveDate,

    /// Case title
    pub title: String,

    /// Regeste / headnote
    pub regeste: String,

    /// Composite relevance score (sum of weighted signals, >= 0)
    pub score: f32,

    /// 1-based global rank across the whole fused pool
    pub rank: usize,

    /// Best passage from the full text, possibly with `<em>` term markers
    pub snippet: String,

    /// Per-signal contributions behind `score`
    pub signals: SignalSet,

    /// Number of retrieval sources that returned this decision
    pub source_hits: u32,
}

impl RankedResult {
    /// Build a result from a decision and its computed ranking state. The
    /// full text is deliberately not carried into results.
    pub fn new(
        decision: &Decision,
        score: f32,
        rank: usize,
        snippet: String,
        signals: SignalSet,
        source_hits: u32,
    ) -> Self {
        Self {
            decision_id: decision.id,
            docket_number: decision.docket_number.clone(),
            court: decision.court.clone(),
            canton: decision.canton.clone(),
            chamber: decision.chamber.clone(),
            language: decision.language.clone(),
            decision_type: decision.decision_type.clone(),
            decision_date: decision.decision_date,
            title: decision.title.clone(),
            regeste: decision.regeste.clone(),
            score,
            rank,
            snippet,
            signals,
            source_hits,
        }
    }
}

/// Response of a ranked search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// The requested page of ranked results
    pub results: Vec<RankedResult>,

    /// Size of the filtered fused pool the page was cut from
    pub total: usize,
}
