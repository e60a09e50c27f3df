//! Title-based deduplication of bibliographic records.
//!
//! Two passes over the table:
//!
//! 1. exact: records whose normalized titles are equal collapse onto the first one;
//! 2. fuzzy: every surviving pair is scored with [`token_sort_ratio`] and the
//!    later record of any pair at or above the threshold is dropped.
//!
//! The fuzzy pass is O(m²) in the number of exact-pass survivors, which is fine
//! for the few thousand records a literature search produces.

use crate::error::Result;
use crate::fuzzy::{ratio, sorted_tokens};
use crate::table::Table;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Default similarity threshold (0-100).
pub const DEFAULT_THRESHOLD: u8 = 95;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s]").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Counts produced by a deduplication run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub initial: usize,
    pub exact_removed: usize,
    pub fuzzy_removed: usize,
    pub remaining: usize,
}

/// Normalize a title for comparison.
///
/// Lowercases, drops everything outside `[a-z0-9\s]`, collapses whitespace runs
/// and trims.
pub fn normalize_title(title: &str) -> String {
    let lower = title.to_lowercase();
    let stripped = NON_ALNUM.replace_all(&lower, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

/// Remove exact and near-duplicate titles from `table`, in place.
///
/// Fails only when `title_column` does not exist.
pub fn deduplicate(table: &mut Table, title_column: &str, threshold: u8) -> Result<DedupReport> {
    let col = table.column_index(title_column)?;
    let initial = table.len();

    info!(records = initial, threshold = threshold, "Starting deduplication");

    // Exact pass
    let normalized: Vec<String> = table
        .rows
        .iter()
        .map(|r| normalize_title(r.get(col).map(String::as_str).unwrap_or("")))
        .collect();

    let mut seen: HashSet<&str> = HashSet::with_capacity(normalized.len());
    let keep_exact: Vec<bool> = normalized.iter().map(|n| seen.insert(n.as_str())).collect();
    let survivors: Vec<&String> = normalized
        .iter()
        .zip(&keep_exact)
        .filter(|(_, keep)| **keep)
        .map(|(n, _)| n)
        .collect();

    let exact_removed = initial - survivors.len();
    table.retain_rows(|i, _| keep_exact[i]);
    info!(
        remaining = table.len(),
        removed = exact_removed,
        "Exact deduplication complete"
    );

    // Fuzzy pass over the reindexed survivors
    let titles: Vec<String> = survivors.iter().map(|n| sorted_tokens(n)).collect();
    let drop = fuzzy_duplicates(&titles, threshold);
    let fuzzy_removed = drop.iter().filter(|d| **d).count();
    table.retain_rows(|i, _| !drop[i]);

    let report = DedupReport {
        initial,
        exact_removed,
        fuzzy_removed,
        remaining: table.len(),
    };
    info!(
        remaining = report.remaining,
        removed = fuzzy_removed,
        "Fuzzy deduplication complete"
    );

    Ok(report)
}

/// Mark every later member of a pair scoring at or above `threshold`.
///
/// `titles` must already be token-sorted. Earlier indices always win; a marked
/// index is never used as the first element of a pair again.
fn fuzzy_duplicates(titles: &[String], threshold: u8) -> Vec<bool> {
    let mut marked = vec![false; titles.len()];

    for i in 0..titles.len() {
        if marked[i] {
            continue;
        }
        for j in (i + 1)..titles.len() {
            if marked[j] {
                continue;
            }
            let score = ratio(&titles[i], &titles[j]);
            if score >= threshold {
                debug!(kept = i, dropped = j, score = score, "Near-duplicate title");
                marked[j] = true;
            }
        }
    }

    marked
}
