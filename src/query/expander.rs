//! Query term expansion.
//!
//! Two sources feed the broadened OR strategy: a compiled-in synonym table
//! for common German, French and Italian legal vocabulary, and optionally an
//! OpenAI-compatible chat endpoint suggesting further terms. The LLM path is
//! strictly best-effort: any failure, slow response or malformed reply
//! degrades to the static table alone and never fails the search.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::debug;

use super::Query;
use crate::config::ExpansionSection;
use crate::text;

/// Folded token -> folded synonyms. Keys and values match what
/// [`text::fold`] produces so lookups work directly on query tokens.
static SYNONYMS: Lazy<AHashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let entries: &[(&str, &[&str])] = &[
        // German
        ("kundigung", &["auflosung", "beendigung"]),
        ("fristlos", &["ausserordentlich"]),
        ("mietvertrag", &["mietverhaltnis", "miete"]),
        ("mieter", &["mietpartei"]),
        ("arbeitsvertrag", &["arbeitsverhaltnis"]),
        ("arbeitnehmer", &["angestellter"]),
        ("entschadigung", &["schadenersatz", "genugtuung"]),
        ("willkur", &["willkurverbot"]),
        ("gehor", &["anhorung"]),
        ("asyl", &["asylgesuch", "fluchtling"]),
        ("wegweisung", &["ausweisung", "ruckfuhrung"]),
        ("verjahrung", &["verwirkung"]),
        ("scheidung", &["ehescheidung"]),
        ("unterhalt", &["alimente", "unterhaltsbeitrag"]),
        ("beschwerde", &["rekurs", "rechtsmittel"]),
        ("urteil", &["entscheid", "erkenntnis"]),
        ("fahrlassigkeit", &["sorgfaltspflicht"]),
        ("eigentum", &["eigentumsgarantie"]),
        // French
        ("licenciement", &["resiliation", "conge"]),
        ("bail", &["location"]),
        ("divorce", &["separation"]),
        ("recours", &["pourvoi"]),
        ("dommage", &["prejudice", "reparation"]),
        ("travailleur", &["employe", "salarie"]),
        ("expulsion", &["renvoi"]),
        // Italian
        ("licenziamento", &["disdetta", "risoluzione"]),
        ("locazione", &["affitto"]),
        ("ricorso", &["impugnazione"]),
        ("divorzio", &["separazione"]),
        ("risarcimento", &["indennizzo"]),
    ];
    entries.iter().copied().collect()
});

/// Source of additional query terms beyond the static table.
#[async_trait]
pub trait TermSuggester: Send + Sync {
    /// Suggest extra search terms for the query text. Implementations must
    /// swallow their own failures and return an empty list instead.
    async fn suggest(&self, query_text: &str) -> Vec<String>;
}

/// Merges static synonyms with suggester output.
pub struct QueryExpander {
    suggester: Option<Arc<dyn TermSuggester>>,
}

impl QueryExpander {
    pub fn new(suggester: Option<Arc<dyn TermSuggester>>) -> Self {
        Self { suggester }
    }

    /// Expansion terms for a natural-language query: folded, deduplicated,
    /// never overlapping the original tokens. Static synonyms come first so
    /// the result is stable when the suggester is disabled or fails.
    pub async fn expand(&self, query: &Query) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();

        for token in &query.tokens {
            if let Some(synonyms) = SYNONYMS.get(token.as_str()) {
                for synonym in *synonyms {
                    push_term(&mut terms, query, synonym);
                }
            }
        }

        if let Some(suggester) = &self.suggester {
            for suggestion in suggester.suggest(&query.normalized).await {
                push_term(&mut terms, query, &suggestion);
            }
        }

        terms
    }
}

fn push_term(terms: &mut Vec<String>, query: &Query, candidate: &str) {
    let folded = text::fold(candidate);
    if folded.len() < 2 {
        return;
    }
    if query.tokens.iter().any(|t| *t == folded) {
        return;
    }
    if terms.iter().any(|t| *t == folded) {
        return;
    }
    terms.push(folded);
}

/// Term suggester backed by an OpenAI-compatible chat completion endpoint.
///
/// The request runs under a hard timeout. Missing API key, transport errors,
/// non-2xx responses and unparseable bodies all log at debug level and yield
/// no terms.
pub struct HttpTermSuggester {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    timeout: Duration,
    max_terms: usize,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpTermSuggester {
    pub fn new(config: &ExpansionSection) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            temperature: config.temperature,
            timeout: Duration::from_millis(config.timeout_ms),
            max_terms: config.max_terms,
        }
    }

    async fn request(&self, api_key: &str, query_text: &str) -> anyhow::Result<Vec<String>> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": 96,
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "You expand search queries over Swiss court decisions. Reply with up to \
                         {} additional legal search terms as a comma-separated list, in the same \
                         language as the query. No explanations.",
                        self.max_terms
                    ),
                },
                { "role": "user", "content": query_text },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("suggestion endpoint returned {}", response.status());
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        Ok(parse_terms(content, self.max_terms))
    }
}

#[async_trait]
impl TermSuggester for HttpTermSuggester {
    async fn suggest(&self, query_text: &str) -> Vec<String> {
        let Some(api_key) = self.api_key.clone() else {
            return Vec::new();
        };

        match tokio::time::timeout(self.timeout, self.request(&api_key, query_text)).await {
            Ok(Ok(terms)) => terms,
            Ok(Err(error)) => {
                debug!(%error, "term suggestion request failed");
                Vec::new()
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "term suggestion timed out"
                );
                Vec::new()
            }
        }
    }
}

/// Split a comma- or newline-separated reply into clean folded terms.
/// Numbering artifacts and overlong phrases are dropped.
fn parse_terms(content: &str, max_terms: usize) -> Vec<String> {
    let mut terms = Vec::new();
    for piece in content.split(['\n', ',', ';']) {
        let words: Vec<String> = text::tokenize(piece)
            .into_iter()
            .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
            .collect();
        if words.is_empty() || words.len() > 3 {
            continue;
        }
        let term = words.join(" ");
        if !terms.contains(&term) {
            terms.push(term);
        }
        if terms.len() == max_terms {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
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

    struct FixedSuggester(Vec<&'static str>);

    #[async_trait]
    impl TermSuggester for FixedSuggester {
        async fn suggest(&self, _query_text: &str) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }
    }

    #[tokio::test]
    async fn static_synonyms_for_german_legal_terms() {
        let expander = QueryExpander::new(None);
        let terms = expander.expand(&query("Kündigung Mietvertrag")).await;
        assert!(terms.contains(&"auflosung".to_string()));
        assert!(terms.contains(&"mietverhaltnis".to_string()));
    }

    #[tokio::test]
    async fn expansion_never_repeats_query_tokens() {
        let suggester = Arc::new(FixedSuggester(vec!["Kündigung", "Vertragsende", "auflosung"]));
        let expander = QueryExpander::new(Some(suggester));
        let terms = expander.expand(&query("Kündigung Mietvertrag")).await;

        // "kundigung" is a query token, "auflosung" already came from the
        // static table
        assert!(!terms.contains(&"kundigung".to_string()));
        assert_eq!(
            terms.iter().filter(|t| *t == "auflosung").count(),
            1,
            "duplicates must collapse"
        );
        assert!(terms.contains(&"vertragsende".to_string()));
    }

    #[tokio::test]
    async fn no_table_hit_no_suggester_yields_empty() {
        let expander = QueryExpander::new(None);
        let terms = expander.expand(&query("quantenphysik vortrag")).await;
        assert!(terms.is_empty());
    }

    #[test]
    fn reply_parsing_handles_lists_and_noise() {
        let terms = parse_terms(
            "1. Vertragsende, fristlose Auflösung; unzumutbar\n42",
            6,
        );
        assert_eq!(
            terms,
            vec!["vertragsende", "fristlose auflosung", "unzumutbar"]
        );

        let capped = parse_terms("a1, b2, c3, d4, e5", 2);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn reply_parsing_drops_overlong_phrases() {
        let terms = parse_terms("die fristlose kündigung des mietvertrags ist", 6);
        assert!(terms.is_empty());
    }
}
