//! Semantic models: embedding provider abstraction, fastembed-backed
//! implementations, and lazy model lifecycle management.

mod models;
mod provider;

pub use models::{CrossEncoder, ModelProvider};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

use crate::decision::Decision;

/// How much full text participates in the embedding passage. Headnote and
/// title carry most of the meaning; the opening of the reasoning adds
/// context without blowing up inference time.
const PASSAGE_TEXT_CHARS: usize = 2000;

/// The text a decision is embedded from: title, regeste, and the opening of
/// the full text.
pub fn embedding_passage(decision: &Decision) -> String {
    let mut passage = String::with_capacity(
        decision.title.len() + decision.regeste.len() + PASSAGE_TEXT_CHARS + 2,
    );
    passage.push_str(&decision.title);
    if !decision.regeste.is_empty() {
        passage.push('\n');
        passage.push_str(&decision.regeste);
    }
    if !decision.full_text.is_empty() {
        passage.push('\n');
        let mut end = PASSAGE_TEXT_CHARS.min(decision.full_text.len());
        while !decision.full_text.is_char_boundary(end) {
            end -= 1;
        }
        passage.push_str(&decision.full_text[..end]);
    }
    passage
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_passage_respects_char_boundaries() {
        let decision = Decision {
            id: 1,
            docket_number: "6B_1/2024".to_string(),
            court: "BGer".to_string(),
            canton: "CH".to_string(),
            chamber: "Strafrechtliche Abteilung".to_string(),
            language: "de".to_string(),
            decision_type: "urteil".to_string(),
            decision_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            title: "Würdigung".to_string(),
            regeste: String::new(),
            full_text: "ä".repeat(3000),
        };

        let passage = embedding_passage(&decision);
        assert!(passage.starts_with("Würdigung\n"));
        // must not panic on the multibyte boundary and must stay bounded
        assert!(passage.len() <= "Würdigung\n".len() + PASSAGE_TEXT_CHARS);
    }
}
