//! Strategy planning: one classified query fans out into several index
//! queries, each with its own fusion weight.

use super::{Intent, Query};
use crate::config::FusionSection;

/// A single retrieval strategy, expressed in the index's native query
/// syntax. The id names the strategy in logs and keeps fusion ordering
/// deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStrategy {
    pub id: &'static str,
    pub query: String,
    pub weight: f32,
}

/// Words that only carry the citation itself; the statute strategy drops
/// them from its free-text part.
const CITATION_MARKERS: &[&str] = &["art", "artikel", "article", "articolo"];

/// Build the text strategies for a query. Explicit-syntax queries pass
/// through as a single strategy; natural-language queries fan out into
/// exact/broad/phrase/field/statute variants. The vector source is not
/// planned here, retrieval adds it when semantic search is enabled.
pub fn plan_strategies(
    query: &Query,
    expansions: &[String],
    fusion: &FusionSection,
) -> Vec<QueryStrategy> {
    match query.intent {
        Intent::ExplicitSyntax => vec![QueryStrategy {
            id: "explicit",
            query: query.normalized.clone(),
            weight: 1.0,
        }],
        Intent::DocketLookup { .. } => Vec::new(),
        Intent::NaturalLanguage => {
            let tokens = &query.tokens;
            if tokens.is_empty() {
                return Vec::new();
            }

            let mut strategies = Vec::with_capacity(5);

            let exact = tokens
                .iter()
                .map(|t| format!("+{t}"))
                .collect::<Vec<_>>()
                .join(" ");
            strategies.push(QueryStrategy {
                id: "and",
                query: exact,
                weight: fusion.and_weight,
            });

            let mut broad = tokens.to_vec();
            broad.extend(expansions.iter().cloned());
            strategies.push(QueryStrategy {
                id: "or",
                query: broad.join(" "),
                weight: fusion.or_weight,
            });

            if tokens.len() >= 2 {
                strategies.push(QueryStrategy {
                    id: "phrase",
                    query: format!("\"{}\"", tokens.join(" ")),
                    weight: fusion.phrase_weight,
                });
            }

            let scoped = tokens
                .iter()
                .map(|t| format!("title:{t}"))
                .chain(tokens.iter().map(|t| format!("regeste:{t}")))
                .collect::<Vec<_>>()
                .join(" ");
            strategies.push(QueryStrategy {
                id: "field",
                query: scoped,
                weight: fusion.field_weight,
            });

            if let Some(statute) = &query.statute {
                let rest = tokens
                    .iter()
                    .filter(|t| {
                        !CITATION_MARKERS.contains(&t.as_str())
                            && **t != statute.article
                            && **t != statute.code
                    })
                    .cloned()
                    .collect::<Vec<_>>();
                let mut q = format!("+statutes:\"{}\"", statute.key);
                if !rest.is_empty() {
                    q.push(' ');
                    q.push_str(&rest.join(" "));
                }
                strategies.push(QueryStrategy {
                    id: "statute",
                    query: q,
                    weight: fusion.statute_weight,
                });
            }

            dedupe(strategies)
        }
    }
}

/// Collapse strategies that compile to the same query string, keeping the
/// highest weight. Duplicate strategies would otherwise double-count a rank
/// in fusion.
fn dedupe(strategies: Vec<QueryStrategy>) -> Vec<QueryStrategy> {
    let mut kept: Vec<QueryStrategy> = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        match kept.iter_mut().find(|k| k.query == strategy.query) {
            Some(existing) => {
                if strategy.weight > existing.weight {
                    *existing = strategy;
                }
            }
            None => kept.push(strategy),
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Pagination, SearchRequest};

    fn nl_query(text: &str) -> Query {
        Query::from_request(
            &SearchRequest::new(text),
            Pagination {
                limit: 10,
                offset: 0,
            },
        )
    }

    fn fusion() -> FusionSection {
        crate::config::EngineConfig::default().fusion
    }

    #[test]
    fn natural_language_fans_out() {
        let query = nl_query("Kündigung Mietvertrag");
        let strategies = plan_strategies(&query, &["auflosung".to_string()], &fusion());

        let ids: Vec<&str> = strategies.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["and", "or", "phrase", "field"]);

        assert_eq!(strategies[0].query, "+kundigung +mietvertrag");
        assert_eq!(strategies[1].query, "kundigung mietvertrag auflosung");
        assert_eq!(strategies[2].query, "\"kundigung mietvertrag\"");
        assert_eq!(
            strategies[3].query,
            "title:kundigung title:mietvertrag regeste:kundigung regeste:mietvertrag"
        );
    }

    #[test]
    fn single_token_skips_phrase() {
        let query = nl_query("Willkür");
        let strategies = plan_strategies(&query, &[], &fusion());
        assert!(strategies.iter().all(|s| s.id != "phrase"));
    }

    #[test]
    fn statute_strategy_requires_citation_and_drops_its_tokens() {
        let query = nl_query("Art. 8 BV Rechtsgleichheit");
        let strategies = plan_strategies(&query, &[], &fusion());

        let statute = strategies
            .iter()
            .find(|s| s.id == "statute")
            .expect("statute strategy");
        assert_eq!(statute.query, "+statutes:\"art 8 bv\" rechtsgleichheit");
    }

    #[test]
    fn explicit_syntax_passes_through_alone() {
        let query = nl_query("title:Willkür AND Verletzung");
        let strategies = plan_strategies(&query, &[], &fusion());
        assert_eq!(strategies.len(), 1);
        assert_eq!(strategies[0].id, "explicit");
        assert_eq!(strategies[0].query, "title:Willkür AND Verletzung");
        assert_eq!(strategies[0].weight, 1.0);
    }

    #[test]
    fn expansions_only_broaden_the_or_strategy() {
        let query = nl_query("Kündigung");
        let strategies = plan_strategies(&query, &["auflosung".to_string()], &fusion());

        let or = strategies.iter().find(|s| s.id == "or").unwrap();
        assert!(or.query.contains("auflosung"));
        let and = strategies.iter().find(|s| s.id == "and").unwrap();
        assert!(!and.query.contains("auflosung"));
    }

    #[test]
    fn duplicate_query_strings_keep_highest_weight() {
        let strategies = vec![
            QueryStrategy {
                id: "and",
                query: "kundigung".to_string(),
                weight: 1.0,
            },
            QueryStrategy {
                id: "or",
                query: "kundigung".to_string(),
                weight: 0.5,
            },
            QueryStrategy {
                id: "phrase",
                query: "\"kundigung\"".to_string(),
                weight: 1.2,
            },
        ];
        let deduped = dedupe(strategies);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "and");
        assert_eq!(deduped[0].weight, 1.0);
    }
}
