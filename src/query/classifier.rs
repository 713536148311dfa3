//! Query intent classification.
//!
//! Three intents, checked in priority order: a query that is exactly one
//! docket number becomes a lookup, a query carrying native index syntax is
//! passed through verbatim, everything else is natural language.

use once_cell::sync::Lazy;
use regex::Regex;

use super::Intent;
use crate::text;

/// Docket numbers come in two shapes: digit-led chamber codes tolerate any
/// separator including space ("6B_1234/2025", "6b 1234/2025"), letter-only
/// codes require an explicit separator ("A-6674/2020") so that prose like
/// "in 2020/2021" is not mistaken for a docket.
static DOCKET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:(\d[a-z]{1,2})[._\s-]?|([a-z]{1,3})[._-])(\d{1,5})/(\d{4})\b").unwrap()
});

static DOCKET_FULL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(\d[a-z]{1,2})[._\s-]?|([a-z]{1,3})[._-])(\d{1,5})/(\d{4})$").unwrap()
});

/// "Art. 8 BV", "Artikel 271a OR", "art. 6 CEDH". The article number may
/// carry a letter suffix (271a, 336c).
static STATUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bart(?:ikel|icle|icolo)?\.?\s*(\d{1,4}[a-z]{0,4})\s+([a-zäöüéè]{2,12})\b")
        .unwrap()
});

/// Uppercase boolean operators are treated as syntax; lowercase "and"/"or"
/// stay ordinary words.
static OPERATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(AND|OR|NOT)\b").unwrap());

static FIELD_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(title|regeste|full_text|court|canton|chamber|language|decision_type|statutes|docket|decision_date):",
    )
    .unwrap()
});

static TERM_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(^|\s)[+-][\w"]"#).unwrap());

/// Abbreviations of federal codes we accept as statute citations, folded.
/// Covers the German, French and Italian citation conventions.
const KNOWN_CODES: &[&str] = &[
    // German
    "bv", "zgb", "or", "stgb", "stpo", "zpo", "schkg", "bgg", "vwvg", "vgg", "dsg", "urg", "mschg",
    "patg", "kg", "uwg", "aig", "asylg", "bvg", "ahvg", "ivg", "uvg", "kvg", "atsg", "mwstg",
    "dbg", "sthg", "bankg", "finmag", "gwg", "svg", "betmg", "usg", "rpg", "emrk",
    // French / Italian
    "cst", "cc", "co", "cp", "cpp", "cpc", "ltf", "lp", "pa", "cedh", "lpd", "lda",
];

/// A statute citation recognized in query text.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatuteRef {
    /// Citation as written ("Art. 8 BV")
    pub raw: String,
    /// Canonical lookup key ("art 8 bv")
    pub key: String,
    /// Article number with suffix, lowercased ("271a")
    pub article: String,
    /// Code abbreviation, folded ("or")
    pub code: String,
}

/// Classify raw query text. Returns the intent and the normalized text the
/// rest of the pipeline works on: the canonical docket for lookups, the
/// sanitized raw text for explicit syntax, the folded text otherwise.
pub fn classify(raw: &str) -> (Intent, String) {
    let trimmed = raw.trim();

    if let Some(caps) = DOCKET_FULL.captures(trimmed) {
        let normalized = canonicalize(&caps);
        return (
            Intent::DocketLookup {
                normalized: normalized.clone(),
            },
            normalized,
        );
    }

    if has_explicit_syntax(trimmed) {
        return (Intent::ExplicitSyntax, sanitize_explicit(trimmed));
    }

    (Intent::NaturalLanguage, text::fold(trimmed))
}

/// Normalize a docket number to its canonical form, "6B_1234/2025". Input
/// that does not look like a docket is uppercased and trimmed as-is, so the
/// function stays total for store-side use.
pub fn normalize_docket(raw: &str) -> String {
    match DOCKET_FULL.captures(raw.trim()) {
        Some(caps) => canonicalize(&caps),
        None => raw.trim().to_uppercase(),
    }
}

/// First docket number mentioned anywhere in the text, canonicalized.
pub fn find_docket(raw: &str) -> Option<String> {
    DOCKET.captures(raw).map(|caps| canonicalize(&caps))
}

/// Split a canonical docket into (chamber, number, year).
pub fn docket_components(normalized: &str) -> Option<(&str, &str, &str)> {
    let (chamber, rest) = normalized.split_once('_')?;
    let (number, year) = rest.split_once('/')?;
    Some((chamber, number, year))
}

/// First statute citation in the text whose code is a known federal
/// abbreviation. Unknown codes are skipped rather than guessed at.
pub fn parse_statute(raw: &str) -> Option<StatuteRef> {
    for caps in STATUTE.captures_iter(raw) {
        let article = caps[1].to_lowercase();
        let code = text::fold(&caps[2]);
        if KNOWN_CODES.contains(&code.as_str()) {
            return Some(StatuteRef {
                raw: caps[0].to_string(),
                key: format!("art {article} {code}"),
                article,
                code,
            });
        }
    }
    None
}

/// All distinct statute citation keys in a text, in first-occurrence order.
/// Used when indexing decisions and when building the citation graph.
pub fn extract_statutes(raw: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for caps in STATUTE.captures_iter(raw) {
        let article = caps[1].to_lowercase();
        let code = text::fold(&caps[2]);
        if KNOWN_CODES.contains(&code.as_str()) {
            let key = format!("art {article} {code}");
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

fn canonicalize(caps: &regex::Captures<'_>) -> String {
    let chamber = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_uppercase())
        .unwrap_or_default();
    format!("{}_{}/{}", chamber, &caps[3], &caps[4])
}

fn has_explicit_syntax(raw: &str) -> bool {
    raw.contains('"')
        || OPERATOR.is_match(raw)
        || FIELD_PREFIX.is_match(raw)
        || TERM_PREFIX.is_match(raw)
}

/// Drop a dangling quote so the downstream parser never sees an unbalanced
/// phrase. Everything else is passed through untouched.
fn sanitize_explicit(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.matches('"').count() % 2 == 1 {
        if let Some(pos) = trimmed.rfind('"') {
            let mut cleaned = String::with_capacity(trimmed.len());
            cleaned.push_str(&trimmed[..pos]);
            cleaned.push_str(&trimmed[pos + 1..]);
            return cleaned.trim().to_string();
        }
    }
    trimmed.to_string()
}
