//! Token-order-insensitive string similarity.
//!
//! Scores live in `0..=100`. Both inputs are reduced to lowercase
//! alphanumeric tokens, the tokens are sorted and re-joined, and the two
//! results are compared with the normalized InDel similarity
//! (`1 - (insertions + deletions) / (len_a + len_b)`) from `rapidfuzz`.

use rapidfuzz::fuzz;

/// Similarity of two strings after sorting their tokens, rounded to `0..=100`.
///
/// Returns 0 when either side has no alphanumeric content.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    let a = sorted_tokens(a);
    let b = sorted_tokens(b);
    ratio(&a, &b)
}

/// Lowercase, replace non-alphanumerics by spaces, sort tokens, join by one space.
pub fn sorted_tokens(s: &str) -> String {
    let processed: String = s
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut tokens: Vec<&str> = processed.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Normalized InDel similarity of two already processed strings.
///
/// Halves round to even, so 94.5 scores 94.
pub fn ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let similarity = fuzz::ratio(a.chars(), b.chars()) * 100.0;
    similarity.round_ties_even() as u8
}
