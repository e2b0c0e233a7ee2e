//! Shared input normalizers.
//!
//! Every layer normalizes identifier lists the same way before use:
//! trimmed, non-empty, deduplicated, lexicographically sorted. Keeping the
//! rules in one place is what makes the per-layer ordering contracts hold.

use std::collections::BTreeSet;

/// Trimmed non-empty token, or `None`.
pub fn nonempty_token(value: &str) -> Option<String> {
    let token = value.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Deduplicated, sorted, non-empty-filtered string list.
pub fn clean_sorted_unique<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cleaned: BTreeSet<String> = values
        .into_iter()
        .filter_map(|value| nonempty_token(value.as_ref()))
        .collect();
    cleaned.into_iter().collect()
}

/// Sorted unique code list from an accumulation set.
pub fn sorted_codes(codes: &BTreeSet<String>) -> Vec<String> {
    codes
        .iter()
        .filter(|code| !code.trim().is_empty())
        .cloned()
        .collect()
}

/// Canonical card key: lowercase, inner whitespace collapsed to one space.
pub fn canonical_card_key(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.to_lowercase())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
