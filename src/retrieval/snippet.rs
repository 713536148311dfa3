//! Passage selection and term highlighting.
//!
//! The snippet is the window of the full text that packs the most distinct
//! query terms, cut at word boundaries. Highlighting is applied afterwards
//! so the markers never influence selection or coverage.

use ahash::AHashSet;

use crate::text::fold;

/// One whitespace-delimited word in the source text. `start..end` spans the
/// word including adjacent punctuation, `core_start..core_end` the
/// alphanumeric core that `folded` was computed from.
struct WordSpan {
    start: usize,
    end: usize,
    core_start: usize,
    core_end: usize,
    folded: String,
}

fn word_spans(text: &str) -> Vec<WordSpan> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    let mut push = |start: usize, end: usize, spans: &mut Vec<WordSpan>| {
        let word = &text[start..end];
        let core_offset = word
            .char_indices()
            .find(|(_, c)| c.is_alphanumeric())
            .map(|(i, _)| i);
        let (core_start, core_end) = match core_offset {
            Some(first) => {
                let last = word
                    .char_indices()
                    .filter(|(_, c)| c.is_alphanumeric())
                    .map(|(i, c)| i + c.len_utf8())
                    .next_back()
                    .unwrap_or(word.len());
                (start + first, start + last)
            }
            None => (end, end),
        };
        let folded = fold(&text[core_start..core_end]);
        spans.push(WordSpan {
            start,
            end,
            core_start,
            core_end,
            folded,
        });
    };

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                push(s, i, &mut spans);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        push(s, text.len(), &mut spans);
    }

    spans
}

/// Select the best passage of roughly `window_chars` from `text`.
///
/// A sliding window over word spans is scored by the number of distinct
/// query terms it contains; ties go to the earliest window. The winning
/// window is then truncated at word boundaries to `max_chars`. Widths are
/// byte lengths. Empty text yields an empty string.
pub fn select_passage(
    text: &str,
    terms: &[String],
    window_chars: usize,
    max_chars: usize,
) -> String {
    if text.is_empty() {
        return String::new();
    }
    let spans = word_spans(text);
    if spans.is_empty() {
        return String::new();
    }

    let term_set: AHashSet<&str> = terms.iter().map(String::as_str).collect();

    let mut best_lo = 0;
    let mut best_hi = 1; // exclusive span index
    let mut best_distinct = 0;

    let mut counts: ahash::AHashMap<&str, u32> = ahash::AHashMap::new();
    let mut distinct = 0;
    let mut hi = 0;
    for lo in 0..spans.len() {
        // grow the window from lo as far as window_chars allows; the word at
        // lo itself is always included even when overlong
        while hi < spans.len()
            && (hi == lo || spans[hi].end - spans[lo].start <= window_chars)
        {
            let folded = spans[hi].folded.as_str();
            if !folded.is_empty() && term_set.contains(folded) {
                let count = counts.entry(folded).or_insert(0);
                *count += 1;
                if *count == 1 {
                    distinct += 1;
                }
            }
            hi += 1;
        }

        if distinct > best_distinct {
            best_distinct = distinct;
            best_lo = lo;
            best_hi = hi;
        }

        let folded = spans[lo].folded.as_str();
        if !folded.is_empty() && term_set.contains(folded) {
            if let Some(count) = counts.get_mut(folded) {
                *count -= 1;
                if *count == 0 {
                    distinct -= 1;
                }
            }
        }
    }

    if best_distinct == 0 {
        // no term hits anywhere, fall back to the leading window
        best_lo = 0;
        best_hi = 1;
        while best_hi < spans.len() && spans[best_hi].end - spans[0].start <= window_chars {
            best_hi += 1;
        }
    }

    // truncate at word boundaries; a single overlong word is kept whole
    let mut cut = best_hi;
    while cut > best_lo + 1 && spans[cut - 1].end - spans[best_lo].start > max_chars {
        cut -= 1;
    }

    text[spans[best_lo].start..spans[cut - 1].end].to_string()
}

/// Wrap every word whose folded core matches a query term in `<em>` markers.
/// Punctuation around the word stays outside the markers.
pub fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    if snippet.is_empty() || terms.is_empty() {
        return snippet.to_string();
    }

    let term_set: AHashSet<&str> = terms.iter().map(String::as_str).collect();
    let mut out = String::with_capacity(snippet.len() + 32);
    let mut cursor = 0;

    for span in word_spans(snippet) {
        if span.folded.is_empty() || !term_set.contains(span.folded.as_str()) {
            continue;
        }
        out.push_str(&snippet[cursor..span.core_start]);
        out.push_str("<em>");
        out.push_str(&snippet[span.core_start..span.core_end]);
        out.push_str("</em>");
        cursor = span.core_end;
    }
    out.push_str(&snippet[cursor..]);

    out
}
