//! Text normalization shared by query parsing, signal computation, and
//! snippet selection.
//!
//! Folding here must agree with the `legal_text` analyzer registered on the
//! tantivy index (lowercase + ascii folding): a query-side token produced by
//! [`tokenize`] matches the index-side term for the same surface form.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase and strip diacritics: `Kündigung` → `kundigung`, `résiliation`
/// → `resiliation`, `Straße` → `strasse`.
pub fn fold(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut expanded = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match c {
            'ß' => expanded.push_str("ss"),
            'œ' => expanded.push_str("oe"),
            'æ' => expanded.push_str("ae"),
            _ => expanded.push(c),
        }
    }
    expanded.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Split into folded word tokens. Runs of alphanumeric characters form
/// tokens; everything else separates. Single-character tokens are dropped
/// unless purely numeric (statute article numbers like the `8` in
/// `Art. 8 BV` must survive).
pub fn tokenize(text: &str) -> Vec<String> {
    let folded = fold(text);
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in folded.chars() {
        if c.is_alphanumeric() {
            current.push(c);
        } else if !current.is_empty() {
            push_token(&mut tokens, std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, current);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, token: String) {
    if token.chars().count() >= 2 || token.chars().all(|c| c.is_ascii_digit()) {
        tokens.push(token);
    }
}

/// True when `phrase` occurs as a consecutive token run inside `field`.
/// Both sides are folded by tokenization, so the check is case- and
/// diacritic-insensitive and treats punctuation as separators.
pub fn contains_phrase(field_tokens: &[String], phrase_tokens: &[String]) -> bool {
    if phrase_tokens.is_empty() || field_tokens.len() < phrase_tokens.len() {
        return false;
    }
    field_tokens
        .windows(phrase_tokens.len())
        .any(|window| window == phrase_tokens)
}

const DE_FUNCTION_WORDS: &[&str] = &[
    "der", "die", "das", "und", "nicht", "wegen", "gegen", "recht", "einer", "eines", "zur", "zum",
];
const FR_FUNCTION_WORDS: &[&str] = &[
    "le", "les", "une", "des", "pour", "dans", "contre", "droit", "sur", "aux", "par",
];
const IT_FUNCTION_WORDS: &[&str] = &[
    "il", "della", "delle", "per", "con", "contro", "diritto", "nel", "dei", "alla",
];

/// Best-effort query language detection from folded tokens. Counts hits in
/// small per-language function-word sets; a clear winner is required, ties
/// and empty scores return `None`.
pub fn detect_language(tokens: &[String]) -> Option<&'static str> {
    let score = |words: &[&str]| -> usize {
        tokens.iter().filter(|t| words.contains(&t.as_str())).count()
    };
    let candidates = [
        ("de", score(DE_FUNCTION_WORDS)),
        ("fr", score(FR_FUNCTION_WORDS)),
        ("it", score(IT_FUNCTION_WORDS)),
    ];
    let best = candidates.iter().max_by_key(|(_, n)| *n)?;
    if best.1 == 0 {
        return None;
    }
    let tied = candidates.iter().filter(|(_, n)| *n == best.1).count();
    if tied > 1 {
        None
    } else {
        Some(best.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_diacritics() {
        assert_eq!(fold("Kündigung"), "kundigung");
        assert_eq!(fold("résiliation"), "resiliation");
        assert_eq!(fold("Straße"), "strasse");
        assert_eq!(fold("cœur"), "coeur");
    }

    #[test]
    fn test_tokenize_drops_short_non_numeric() {
        let tokens = tokenize("Art. 8 BV");
        assert_eq!(tokens, vec!["art", "8", "bv"]);
    }

    #[test]
    fn test_tokenize_folds() {
        let tokens = tokenize("Mietrecht: Kündigung!");
        assert_eq!(tokens, vec!["mietrecht", "kundigung"]);
    }

    #[test]
    fn test_contains_phrase() {
        let field = tokenize("Mietrecht und Kündigung des Vertrags");
        let phrase = tokenize("mietrecht und kündigung");
        assert!(contains_phrase(&field, &phrase));

        let scattered = tokenize("Kündigung kam vor dem Mietrecht");
        assert!(!contains_phrase(&scattered, &phrase));
    }

    #[test]
    fn test_contains_phrase_empty() {
        let field = tokenize("anything");
        assert!(!contains_phrase(&field, &[]));
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(
            detect_language(&tokenize("die Kündigung wegen Eigenbedarf")),
            Some("de")
        );
        assert_eq!(
            detect_language(&tokenize("résiliation du bail pour les locaux")),
            Some("fr")
        );
        assert_eq!(
            detect_language(&tokenize("disdetta della locazione per uso proprio")),
            Some("it")
        );
        assert_eq!(detect_language(&tokenize("Mietrecht")), None);
    }
}
