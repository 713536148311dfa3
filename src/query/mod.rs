//! Query model: request types, intent classification, expansion, and
//! strategy planning.

mod classifier;
mod expander;
mod planner;

pub use classifier::{
    classify, docket_components, extract_statutes, find_docket, normalize_docket, parse_statute,
    StatuteRef,
};
pub use expander::{HttpTermSuggester, QueryExpander, TermSuggester};
pub use planner::{plan_strategies, QueryStrategy};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::text;

/// Detected query intent, in classification priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// The whole query is one docket number; ranking machinery is bypassed
    DocketLookup { normalized: String },
    /// The query carries native index syntax (operators, quotes, field
    /// prefixes) and is passed through as a single strategy
    ExplicitSyntax,
    /// Free text, handled by the multi-strategy pipeline
    NaturalLanguage,
}

/// Hard filters. Every filter constrains every retrieval source identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canton: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chamber: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_type: Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self == &QueryFilters::default()
    }

    /// Post-hydration check mirroring the native index filters. Sources
    /// without native filtering are held to the same constraints here.
    pub fn matches(&self, decision: &crate::decision::Decision) -> bool {
        fn eq_folded(filter: &Option<String>, value: &str) -> bool {
            match filter {
                Some(wanted) => text::fold(wanted) == text::fold(value),
                None => true,
            }
        }

        eq_folded(&self.court, &decision.court)
            && eq_folded(&self.canton, &decision.canton)
            && eq_folded(&self.language, &decision.language)
            && eq_folded(&self.chamber, &decision.chamber)
            && eq_folded(&self.decision_type, &decision.decision_type)
            && self
                .date_from
                .map_or(true, |from| decision.decision_date >= from)
            && self.date_to.map_or(true, |to| decision.decision_date <= to)
    }
}

/// Pagination window, applied only after the whole fused pool is sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

/// Result ordering. `Relevance` is the composite-score ranking; the date
/// orders replace it entirely (deterministic id tie-break either way).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Relevance,
    DateDesc,
    DateAsc,
}

/// Search request as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Raw query text
    pub text: String,

    /// Hard filters
    #[serde(default)]
    pub filters: QueryFilters,

    /// Maximum number of results (0 picks the configured default)
    #[serde(default)]
    pub limit: usize,

    /// Result offset for pagination
    #[serde(default)]
    pub offset: usize,

    /// Optional sort override
    #[serde(default)]
    pub sort: SortOrder,
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filters: QueryFilters::default(),
            limit: 0,
            offset: 0,
            sort: SortOrder::default(),
        }
    }
}

/// Fully classified query. Built once per request, immutable afterwards;
/// every pipeline stage reads from it.
#[derive(Debug, Clone)]
pub struct Query {
    /// Raw text as submitted
    pub raw: String,
    /// Detected intent
    pub intent: Intent,
    /// Normalized query text (fold for natural language, trimmed raw for
    /// explicit syntax, canonical docket for lookups)
    pub normalized: String,
    /// Folded word tokens of the normalized text
    pub tokens: Vec<String>,
    /// Statute citation recognized in the text, if any
    pub statute: Option<StatuteRef>,
    /// Docket number mentioned anywhere in the text, canonicalized
    pub docket: Option<String>,
    /// Language the scoring should prefer: explicit filter, else detected
    pub preferred_language: Option<String>,
    /// Hard filters
    pub filters: QueryFilters,
    /// Pagination window
    pub page: Pagination,
    /// Sort override
    pub sort: SortOrder,
}

impl Query {
    /// Classify a request into an immutable query.
    pub fn from_request(request: &SearchRequest, page: Pagination) -> Self {
        let (intent, normalized) = classify(&request.text);
        let tokens = match intent {
            Intent::DocketLookup { .. } => Vec::new(),
            _ => text::tokenize(&normalized),
        };
        let statute = parse_statute(&request.text);
        let docket = find_docket(&request.text);
        let preferred_language = request
            .filters
            .language
            .clone()
            .or_else(|| text::detect_language(&tokens).map(str::to_string));

        Self {
            raw: request.text.clone(),
            intent,
            normalized,
            tokens,
            statute,
            docket,
            preferred_language,
            filters: request.filters.clone(),
            page,
            sort: request.sort,
        }
    }

    /// Reinterpret the request as free text. Used when a docket lookup
    /// misses and the number should be searched as plain text instead.
    pub fn into_natural(mut self) -> Self {
        self.intent = Intent::NaturalLanguage;
        self.normalized = text::fold(self.raw.trim());
        self.tokens = text::tokenize(&self.normalized);
        self
    }

    /// Distinct folded query terms, in first-occurrence order.
    pub fn distinct_terms(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.tokens
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect()
    }
}
