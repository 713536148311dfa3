//! Relevance signals computed per fused candidate.
//!
//! Every signal is a nonnegative f32. The composite score is the weighted
//! sum over `Signal::ALL`, so adding a signal is one enum variant, one
//! weight field, and one computation arm.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

use super::fusion::FusionRecord;
use super::snippet::select_passage;
use crate::config::{SignalWeights, SnippetSection};
use crate::decision::{Decision, DecisionId};
use crate::query::{docket_components, normalize_docket, Query};
use crate::text::{contains_phrase, tokenize};

/// The fixed signal inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Bm25,
    TitleCoverage,
    RegesteCoverage,
    SnippetCoverage,
    TitlePhrase,
    RegestePhrase,
    DocketExact,
    DocketPartial,
    StatuteBoost,
    CourtPrior,
    LanguageMatch,
    VectorSimilarity,
}

impl Signal {
    /// Every signal, in the order they are summed and reported.
    pub const ALL: [Signal; 12] = [
        Signal::Bm25,
        Signal::TitleCoverage,
        Signal::RegesteCoverage,
        Signal::SnippetCoverage,
        Signal::TitlePhrase,
        Signal::RegestePhrase,
        Signal::DocketExact,
        Signal::DocketPartial,
        Signal::StatuteBoost,
        Signal::CourtPrior,
        Signal::LanguageMatch,
        Signal::VectorSimilarity,
    ];

    /// Config and serialization key.
    pub fn key(self) -> &'static str {
        match self {
            Signal::Bm25 => "bm25",
            Signal::TitleCoverage => "title_coverage",
            Signal::RegesteCoverage => "regeste_coverage",
            Signal::SnippetCoverage => "snippet_coverage",
            Signal::TitlePhrase => "title_phrase",
            Signal::RegestePhrase => "regeste_phrase",
            Signal::DocketExact => "docket_exact",
            Signal::DocketPartial => "docket_partial",
            Signal::StatuteBoost => "statute_boost",
            Signal::CourtPrior => "court_prior",
            Signal::LanguageMatch => "language_match",
            Signal::VectorSimilarity => "vector_similarity",
        }
    }
}

impl SignalWeights {
    /// Weight applied to a signal in the composite score.
    pub fn weight(&self, signal: Signal) -> f32 {
        match signal {
            Signal::Bm25 => self.bm25,
            Signal::TitleCoverage => self.title_coverage,
            Signal::RegesteCoverage => self.regeste_coverage,
            Signal::SnippetCoverage => self.snippet_coverage,
            Signal::TitlePhrase => self.title_phrase,
            Signal::RegestePhrase => self.regeste_phrase,
            Signal::DocketExact => self.docket_exact,
            Signal::DocketPartial => self.docket_partial,
            Signal::StatuteBoost => self.statute_boost,
            Signal::CourtPrior => self.court_prior,
            Signal::LanguageMatch => self.language_match,
            Signal::VectorSimilarity => self.vector_similarity,
        }
    }
}

/// Computed signal values for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    pub bm25: f32,
    pub title_coverage: f32,
    pub regeste_coverage: f32,
    pub snippet_coverage: f32,
    pub title_phrase: f32,
    pub regeste_phrase: f32,
    pub docket_exact: f32,
    pub docket_partial: f32,
    pub statute_boost: f32,
    pub court_prior: f32,
    pub language_match: f32,
    pub vector_similarity: f32,
}

impl SignalSet {
    pub fn get(&self, signal: Signal) -> f32 {
        match signal {
            Signal::Bm25 => self.bm25,
            Signal::TitleCoverage => self.title_coverage,
            Signal::RegesteCoverage => self.regeste_coverage,
            Signal::SnippetCoverage => self.snippet_coverage,
            Signal::TitlePhrase => self.title_phrase,
            Signal::RegestePhrase => self.regeste_phrase,
            Signal::DocketExact => self.docket_exact,
            Signal::DocketPartial => self.docket_partial,
            Signal::StatuteBoost => self.statute_boost,
            Signal::CourtPrior => self.court_prior,
            Signal::LanguageMatch => self.language_match,
            Signal::VectorSimilarity => self.vector_similarity,
        }
    }

    /// Weighted sum over the full inventory.
    pub fn composite(&self, weights: &SignalWeights) -> f32 {
        Signal::ALL
            .iter()
            .map(|&signal| weights.weight(signal) * self.get(signal))
            .sum()
    }
}

/// Topic keyword to specialized federal court, matched by token prefix so
/// compounds like "asylverfahren" and "patentverletzung" hit too.
const COURT_TOPICS: &[(&str, &str)] = &[
    ("asyl", "BVGer"),
    ("asile", "BVGer"),
    ("asilo", "BVGer"),
    ("fluchtling", "BVGer"),
    ("refugie", "BVGer"),
    ("patent", "BPatGer"),
    ("brevet", "BPatGer"),
    ("geldwascherei", "BStGer"),
    ("blanchiment", "BStGer"),
    ("riciclaggio", "BStGer"),
    ("auslieferung", "BStGer"),
    ("extradition", "BStGer"),
];

fn court_for_topic(tokens: &[String]) -> Option<&'static str> {
    for token in tokens {
        for (keyword, court) in COURT_TOPICS {
            if token.starts_with(keyword) {
                return Some(court);
            }
        }
    }
    None
}

/// Fraction of the distinct query terms present in the field.
fn coverage(terms: &[String], field_tokens: &[String]) -> f32 {
    if terms.is_empty() || field_tokens.is_empty() {
        return 0.0;
    }
    let present: AHashSet<&str> = field_tokens.iter().map(String::as_str).collect();
    let found = terms.iter().filter(|t| present.contains(t.as_str())).count();
    found as f32 / terms.len() as f32
}

fn component_overlap(a: &str, b: &str) -> usize {
    match (docket_components(a), docket_components(b)) {
        (Some((ca, sa, ya)), Some((cb, sb, yb))) => {
            usize::from(ca == cb) + usize::from(sa == sb) + usize::from(ya == yb)
        }
        _ => 0,
    }
}

/// Per-candidate signal computation for one request.
///
/// Optional collaborators arrive as plain maps. A subsystem that is down or
/// disabled shows up as an empty map and its signal stays zero; computation
/// itself never fails.
pub struct SignalComputer<'a> {
    query: &'a Query,
    snippet: &'a SnippetSection,
    terms: Vec<String>,
    court_prior: Option<&'static str>,
    statute_citers: AHashMap<DecisionId, u32>,
    incoming_citations: AHashMap<DecisionId, u32>,
    vector_scores: AHashMap<DecisionId, f32>,
}

impl<'a> SignalComputer<'a> {
    pub fn new(query: &'a Query, snippet: &'a SnippetSection) -> Self {
        Self {
            query,
            snippet,
            terms: query.distinct_terms(),
            court_prior: court_for_topic(&query.tokens),
            statute_citers: AHashMap::new(),
            incoming_citations: AHashMap::new(),
            vector_scores: AHashMap::new(),
        }
    }

    /// Attach citation-graph lookups for the query's statute: mention counts
    /// per citing decision and incoming-citation counts.
    pub fn with_citations(
        mut self,
        statute_citers: AHashMap<DecisionId, u32>,
        incoming_citations: AHashMap<DecisionId, u32>,
    ) -> Self {
        self.statute_citers = statute_citers;
        self.incoming_citations = incoming_citations;
        self
    }

    /// Attach cosine similarities reported by the vector source.
    pub fn with_vector_scores(mut self, vector_scores: AHashMap<DecisionId, f32>) -> Self {
        self.vector_scores = vector_scores;
        self
    }

    /// Signals for one candidate, plus the selected passage. The passage is
    /// chosen here so snippet coverage is measured on exactly the text the
    /// caller will display.
    pub fn compute(&self, decision: &Decision, record: &FusionRecord) -> (SignalSet, String) {
        let mut signals = SignalSet::default();

        signals.bm25 = record.best_native_score.max(0.0);

        let title_tokens = tokenize(&decision.title);
        let regeste_tokens = tokenize(&decision.regeste);
        signals.title_coverage = coverage(&self.terms, &title_tokens);
        signals.regeste_coverage = coverage(&self.terms, &regeste_tokens);

        if self.query.tokens.len() >= 2 {
            if contains_phrase(&title_tokens, &self.query.tokens) {
                signals.title_phrase = 1.0;
            }
            if contains_phrase(&regeste_tokens, &self.query.tokens) {
                signals.regeste_phrase = 1.0;
            }
        }

        if let Some(wanted) = &self.query.docket {
            let found = normalize_docket(&decision.docket_number);
            if found == *wanted {
                signals.docket_exact = 1.0;
            } else if component_overlap(&found, wanted) >= 2 {
                signals.docket_partial = 1.0;
            }
        }

        if self.query.statute.is_some() {
            if let Some(&mentions) = self.statute_citers.get(&decision.id) {
                let mentions = mentions as f32;
                let saturation = mentions / (mentions + 3.0);
                let incoming = self
                    .incoming_citations
                    .get(&decision.id)
                    .copied()
                    .unwrap_or(0) as f32;
                let prominence = 1.0 + (1.0 + incoming).ln() / 10.0;
                signals.statute_boost = saturation * prominence;
            }
        }

        if let Some(court) = self.court_prior {
            if decision.court.eq_ignore_ascii_case(court) {
                signals.court_prior = 1.0;
            }
        }

        if let Some(language) = &self.query.preferred_language {
            if decision.language.eq_ignore_ascii_case(language) {
                signals.language_match = 1.0;
            }
        }

        if let Some(&similarity) = self.vector_scores.get(&decision.id) {
            signals.vector_similarity = similarity.clamp(0.0, 1.0);
        }

        let snippet = select_passage(
            &decision.full_text,
            &self.terms,
            self.snippet.window_chars,
            self.snippet.max_chars,
        );
        signals.snippet_coverage = coverage(&self.terms, &tokenize(&snippet));

        (signals, snippet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::query::{Pagination, SearchRequest};

    fn query(text: &str) -> Query {
        Query::from_request(
            &SearchRequest::new(text),
            Pagination {
                limit: 10,
                offset: 0,
            },
        )
    }

    fn decision(id: DecisionId) -> Decision {
        Decision {
            id,
            docket_number: "6B_1234/2024".to_string(),
            court: "BGer".to_string(),
            canton: "CH".to_string(),
            chamber: "6B".to_string(),
            language: "de".to_string(),
            decision_type: "urteil".to_string(),
            decision_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            title: "Kündigung des Mietvertrags aus wichtigem Grund".to_string(),
            regeste: "Fristlose Kündigung; Art. 257f OR; Sorgfaltspflicht des Mieters."
                .to_string(),
            full_text: "Der Mieter hat die Kündigung des Mietvertrags angefochten. \
                        Nach Art. 257f OR kann der Vermieter fristlos kündigen."
                .to_string(),
        }
    }

    fn compute(q: &Query, d: &Decision) -> SignalSet {
        let config = EngineConfig::default();
        let computer = SignalComputer::new(q, &config.snippet);
        computer.compute(d, &FusionRecord::default()).0
    }

    #[test]
    fn test_signal_keys_are_distinct() {
        let keys: AHashSet<&str> = Signal::ALL.iter().map(|s| s.key()).collect();
        assert_eq!(keys.len(), Signal::ALL.len());
    }

    #[test]
    fn test_composite_is_exact_weighted_sum() {
        let config = EngineConfig::default();
        let mut signals = SignalSet::default();
        signals.bm25 = 3.2;
        signals.title_coverage = 0.5;
        signals.docket_exact = 1.0;
        signals.vector_similarity = 0.9;

        let expected: f32 = Signal::ALL
            .iter()
            .map(|&s| config.signals.weight(s) * signals.get(s))
            .sum();
        assert_eq!(signals.composite(&config.signals), expected);
    }

    #[test]
    fn test_coverage_counts_exact_folded_tokens() {
        let q = query("Kündigung Mietvertrag");
        let signals = compute(&q, &decision(1));

        // "kundigung" matches; the inflected "mietvertrags" does not, there
        // is no stemming
        assert_eq!(signals.title_coverage, 0.5);
        assert_eq!(signals.title_phrase, 0.0);
        assert!(signals.snippet_coverage > 0.0);
    }

    #[test]
    fn test_phrase_requires_adjacency() {
        let q = query("wichtigem Grund");
        let signals = compute(&q, &decision(1));
        assert_eq!(signals.title_phrase, 1.0);
    }

    #[test]
    fn test_docket_exact_suppresses_partial() {
        let q = query("Urteil 6B 1234/2024");
        let signals = compute(&q, &decision(1));
        assert_eq!(signals.docket_exact, 1.0);
        assert_eq!(signals.docket_partial, 0.0);
    }

    #[test]
    fn test_docket_partial_on_two_components() {
        let q = query("Urteil 6B 9999/2024");
        // same chamber, same year, different serial
        let signals = compute(&q, &decision(1));
        assert_eq!(signals.docket_exact, 0.0);
        assert_eq!(signals.docket_partial, 1.0);
    }

    #[test]
    fn test_statute_boost_zero_without_graph() {
        let q = query("Verletzung von Art. 257f OR");
        assert!(q.statute.is_some());
        let signals = compute(&q, &decision(1));
        assert_eq!(signals.statute_boost, 0.0);
    }

    #[test]
    fn test_statute_boost_grows_with_mentions_and_stays_bounded() {
        let config = EngineConfig::default();
        let q = query("Verletzung von Art. 257f OR");
        let d = decision(1);

        let boost = |mentions: u32, incoming: u32| {
            let mut citers = AHashMap::new();
            citers.insert(d.id, mentions);
            let mut cited = AHashMap::new();
            cited.insert(d.id, incoming);
            let computer =
                SignalComputer::new(&q, &config.snippet).with_citations(citers, cited);
            computer.compute(&d, &FusionRecord::default()).0.statute_boost
        };

        assert!(boost(5, 0) > boost(1, 0));
        assert!(boost(1, 50) > boost(1, 0));
        // saturation keeps the mention part under 1.0
        assert!(boost(1000, 0) < 1.0);
    }

    #[test]
    fn test_court_prior_for_asylum_topics() {
        let q = query("Asylverfahren Wegweisung");
        let mut d = decision(1);
        d.court = "BVGer".to_string();
        let signals = compute(&q, &d);
        assert_eq!(signals.court_prior, 1.0);

        let other = compute(&q, &decision(2));
        assert_eq!(other.court_prior, 0.0);
    }

    #[test]
    fn test_language_match_follows_detected_language() {
        let q = query("die Kündigung wegen nicht bezahlter Miete");
        assert_eq!(q.preferred_language.as_deref(), Some("de"));

        let signals = compute(&q, &decision(1));
        assert_eq!(signals.language_match, 1.0);

        let mut d = decision(2);
        d.language = "fr".to_string();
        assert_eq!(compute(&q, &d).language_match, 0.0);
    }

    #[test]
    fn test_vector_similarity_clamped_to_unit_interval() {
        let config = EngineConfig::default();
        let q = query("Mietrecht");
        let d = decision(1);

        let mut scores = AHashMap::new();
        scores.insert(d.id, 1.7);
        let computer = SignalComputer::new(&q, &config.snippet).with_vector_scores(scores);
        let (signals, _) = computer.compute(&d, &FusionRecord::default());
        assert_eq!(signals.vector_similarity, 1.0);

        let mut scores = AHashMap::new();
        scores.insert(d.id, -0.4);
        let computer = SignalComputer::new(&q, &config.snippet).with_vector_scores(scores);
        let (signals, _) = computer.compute(&d, &FusionRecord::default());
        assert_eq!(signals.vector_similarity, 0.0);
    }

    #[test]
    fn test_bm25_carries_best_native_score() {
        let q = query("Mietrecht");
        let config = EngineConfig::default();
        let computer = SignalComputer::new(&q, &config.snippet);
        let record = FusionRecord {
            rrf_score: 0.03,
            source_hits: 2,
            best_native_score: 7.25,
        };
        let (signals, _) = computer.compute(&decision(1), &record);
        assert_eq!(signals.bm25, 7.25);
    }
}
