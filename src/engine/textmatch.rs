// ── Engine: Text Matching Primitives ────────────────────────────────────────
// Shared string machinery for the resolver and the registry search path:
//
//   normalize           — lowercase, collapse whitespace, trim
//   is_ticker_like      — ticker shape check (applied BEFORE normalization)
//   trigram_similarity  — pg_trgm-style word trigram Jaccard, also exposed
//                         to SQL as the `trgm_similarity` scalar
//   sequence_ratio      — difflib-style 2·M/T similarity over chars
//   fts_match_expr      — sanitize free text into an FTS5 MATCH expression

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

/// Lowercase, collapse internal Unicode whitespace to single spaces, trim.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ticker shape: 1-5 uppercase letters, optionally a dot plus one letter
/// (BRK.B). Checked against the raw trimmed input, never the normalized form.
pub fn is_ticker_like(text: &str) -> bool {
    static TICKER_RE: OnceLock<Regex> = OnceLock::new();
    if text.is_empty() || text.len() > 6 {
        return false;
    }
    TICKER_RE
        .get_or_init(|| Regex::new(r"^[A-Z]{1,5}(\.[A-Z])?$").expect("ticker regex"))
        .is_match(text)
}

// ═══════════════════════════════════════════════════════════════════════════
// Trigram similarity
// ═══════════════════════════════════════════════════════════════════════════

/// Word-wise trigram extraction: each alphanumeric word is lowercased and
/// padded with two leading and one trailing space before windowing, matching
/// pg_trgm's tokenization so tiered confidence cut-offs carry over.
fn trigram_set(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    let mut set = HashSet::new();
    for word in lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = std::iter::repeat(' ')
            .take(2)
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

/// Jaccard similarity over the two trigram sets, in [0, 1].
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigram_set(a);
    let tb = trigram_set(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f64 / union as f64
}

// ═══════════════════════════════════════════════════════════════════════════
// Sequence ratio
// ═══════════════════════════════════════════════════════════════════════════

/// Similarity ratio `2·M/T` where M is the total length of the matching
/// blocks between the two char sequences and T the combined length.
/// Identical strings score 1.0, disjoint strings 0.0.
pub fn sequence_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// Total matched length: longest common block, then recurse on both sides.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (ai, bi, len) = longest_match(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..ai], &b[..bi])
        + matching_chars(&a[ai + len..], &b[bi + len..])
}

fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &c) in b.iter().enumerate() {
        b2j.entry(c).or_default().push(j);
    }

    let (mut best_i, mut best_j, mut best_len) = (0usize, 0usize, 0usize);
    let mut j2len: HashMap<usize, usize> = HashMap::new();
    for (i, &c) in a.iter().enumerate() {
        let mut next_j2len: HashMap<usize, usize> = HashMap::new();
        if let Some(js) = b2j.get(&c) {
            for &j in js {
                let run = if j > 0 {
                    j2len.get(&(j - 1)).copied().unwrap_or(0) + 1
                } else {
                    1
                };
                next_j2len.insert(j, run);
                if run > best_len {
                    best_i = i + 1 - run;
                    best_j = j + 1 - run;
                    best_len = run;
                }
            }
        }
        j2len = next_j2len;
    }
    (best_i, best_j, best_len)
}

// ═══════════════════════════════════════════════════════════════════════════
// FTS5 query sanitization
// ═══════════════════════════════════════════════════════════════════════════

/// Build an FTS5 MATCH expression from free text: each token is reduced to
/// its alphanumeric core and double-quoted (implicit AND). Returns None when
/// nothing searchable remains.
pub fn fts_match_expr(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| t.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  Apple\t Inc.\n"), "apple inc.");
        assert_eq!(normalize("APPLE"), "apple");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_ticker_shape_boundaries() {
        assert!(is_ticker_like("A"));
        assert!(is_ticker_like("AAPL"));
        assert!(is_ticker_like("AAAAA"));
        assert!(!is_ticker_like("AAAAAA"));
        assert!(is_ticker_like("BRK.B"));
        assert!(!is_ticker_like("BRK.BB"));
        assert!(!is_ticker_like("aapl"));
        assert!(!is_ticker_like(""));
    }

    #[test]
    fn test_trigram_identical_strings() {
        assert!((trigram_similarity("apple", "apple") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_trigram_partial_overlap() {
        // "appl" vs "apple": shares {"  a", " ap", "app", "ppl"} of a
        // 7-trigram union → 4/7.
        let sim = trigram_similarity("appl", "apple");
        assert!((sim - 4.0 / 7.0).abs() < 1e-9, "got {sim}");
    }

    #[test]
    fn test_trigram_disjoint() {
        assert_eq!(trigram_similarity("xyz", "apple"), 0.0);
        assert_eq!(trigram_similarity("", "apple"), 0.0);
    }

    #[test]
    fn test_sequence_ratio_bounds() {
        assert!((sequence_ratio("apple", "apple") - 1.0).abs() < f64::EPSILON);
        assert_eq!(sequence_ratio("abc", "xyz"), 0.0);
        assert!((sequence_ratio("", "") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sequence_ratio_partial() {
        // "appl" against "apple inc.": one 4-char block over 14 chars → 8/14.
        let ratio = sequence_ratio("appl", "apple inc.");
        assert!((ratio - 8.0 / 14.0).abs() < 1e-9, "got {ratio}");
    }

    #[test]
    fn test_fts_expr_sanitizes_tokens() {
        assert_eq!(fts_match_expr("Apple Inc."), Some("\"Apple\" \"Inc\"".into()));
        assert_eq!(fts_match_expr("  "), None);
        assert_eq!(fts_match_expr("!!"), None);
    }
}
