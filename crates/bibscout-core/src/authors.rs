//! Author-name handling: surname extraction and overlap scoring.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use unicode_normalization::UnicodeNormalization;

/// Common surname prefixes that belong to the family name (case-insensitive).
static SURNAME_PREFIXES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["van", "von", "de", "del", "della", "di", "da", "la", "le", "mac", "mc"]
        .into_iter()
        .collect()
});

/// Decompose accents and strip to ASCII so "Gómez" and "Gomez" compare equal.
fn ascii_fold(s: &str) -> String {
    s.nfkd().filter(|c| c.is_ascii()).collect()
}

/// Extract the surname from an author name, preserving its case.
///
/// Handles `"Family, Given"`, `"Given Family"`, and two-part family names
/// like `"Jay Van Bavel"`.
pub fn surname(name: &str) -> String {
    let name = name.trim().trim_matches(|c| c == '{' || c == '}');
    if name.is_empty() {
        return String::new();
    }

    if let Some((family, _)) = name.split_once(',') {
        return family.trim().to_string();
    }

    let parts: Vec<&str> = name.split_whitespace().collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].to_string(),
        n => {
            if n >= 2 && SURNAME_PREFIXES.contains(parts[n - 2].to_lowercase().as_str()) {
                parts[n - 2..].join(" ")
            } else {
                parts[n - 1].to_string()
            }
        }
    }
}

/// Surname lower-cased and ASCII-folded, for set comparison.
pub fn normalize_surname(name: &str) -> String {
    ascii_fold(&surname(name)).to_lowercase()
}

/// Surnames extracted from a BibTeX `author` field (`"A and B and C"`).
pub fn surnames_from_field(field: &str) -> Vec<String> {
    field
        .split(" and ")
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(surname)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Fraction of the query's authors found among the candidate's, normalized
/// by `min(3, query author count)` so long author lists don't need to match
/// in full. 0.0 when the query carries no authors.
pub fn surname_overlap(query_authors: &[String], found_surnames: &[String]) -> f64 {
    if query_authors.is_empty() {
        return 0.0;
    }

    let query_set: HashSet<String> = query_authors
        .iter()
        .map(|a| normalize_surname(a))
        .filter(|s| !s.is_empty())
        .collect();
    let found_set: HashSet<String> = found_surnames
        .iter()
        .map(|a| normalize_surname(a))
        .filter(|s| !s.is_empty())
        .collect();

    if query_set.is_empty() {
        return 0.0;
    }

    let inter = query_set.intersection(&found_set).count() as f64;
    let denom = query_authors.len().min(3) as f64;
    (inter / denom).min(1.0)
}
