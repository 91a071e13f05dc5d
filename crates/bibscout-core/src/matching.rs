//! Candidate scoring used to pick among ambiguous provider results.
//!
//! Everything here is a pure function over strings and records: no I/O, no
//! side effects. Scores are recomputed per candidate set and never persisted.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::authors::surname_overlap;
use crate::provider::CandidateRecord;
use crate::Query;

/// Minimum score for a title-search result to count as a confident match.
pub const SEARCH_MIN_SCORE: f64 = 0.6;

/// Title-heavy weights for ranking plain search results.
pub const SEARCH_WEIGHTS: ScoreWeights = ScoreWeights {
    title: 0.8,
    year: 0.2,
    authors: 0.0,
    publisher: 0.0,
};

/// Four-term blend used when matching an entry against DOI-enrichment
/// candidates.
pub const ENRICH_WEIGHTS: ScoreWeights = ScoreWeights {
    title: 0.5,
    year: 0.15,
    authors: 0.2,
    publisher: 0.15,
};

/// Per-call-site weights for [`score_candidate`]. The weights of a call site
/// are fixed; only the acceptance threshold varies.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub title: f64,
    pub year: f64,
    pub authors: f64,
    pub publisher: f64,
}

/// Normalize a title for keying and emptiness checks: unescape common HTML
/// entities, NFKD-decompose, strip to ASCII, keep only `[a-z0-9]`.
pub fn normalize_title(title: &str) -> String {
    let title = title
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");

    let ascii: String = title.nfkd().filter(|c| c.is_ascii()).collect();

    static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());
    NON_ALNUM.replace_all(&ascii, "").to_lowercase()
}

/// Lowercase, punctuation replaced by spaces, whitespace collapsed.
/// Word boundaries are preserved, unlike [`normalize_title`].
fn simplify_title(title: &str) -> String {
    let ascii: String = title.nfkd().filter(|c| c.is_ascii()).collect();
    let lower = ascii.to_lowercase();

    static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
    static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    let cleaned = NON_WORD.replace_all(&lower, " ");
    WS.replace_all(cleaned.trim(), " ").to_string()
}

/// Similarity of two titles in [0, 1].
///
/// A much shorter title contained in the longer one scores a flat 0.8: that
/// shape is almost always a subtitle or a venue suffix on the same work.
/// Otherwise the score blends normalized edit similarity with word overlap,
/// so reworded-but-related titles are not punished as hard as pure edit
/// distance would.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a2 = simplify_title(a);
    let b2 = simplify_title(b);
    if a2.is_empty() || b2.is_empty() {
        return 0.0;
    }

    if a2.len() > b2.len() * 2 && a2.contains(&b2) {
        return 0.8;
    }
    if b2.len() > a2.len() * 2 && b2.contains(&a2) {
        return 0.8;
    }

    let base = rapidfuzz::fuzz::ratio(a2.chars(), b2.chars());

    let a_words: HashSet<&str> = a2.split_whitespace().collect();
    let b_words: HashSet<&str> = b2.split_whitespace().collect();
    if a_words.is_empty() || b_words.is_empty() {
        return base;
    }
    let overlap =
        a_words.intersection(&b_words).count() as f64 / a_words.len().max(b_words.len()) as f64;

    0.7 * base + 0.3 * overlap
}

/// 1.0 iff both years are known and within one year of each other.
pub fn year_proximity(a: Option<i32>, b: Option<i32>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) if (a - b).abs() <= 1 => 1.0,
        _ => 0.0,
    }
}

/// Groups of spellings that denote the same publisher. Agreement requires
/// both names to hit the same group (or match exactly / by substring).
static PUBLISHER_SYNONYMS: Lazy<Vec<Vec<&'static str>>> = Lazy::new(|| {
    vec![
        vec!["acm", "association for computing machinery"],
        vec!["ieee", "institute of electrical and electronics engineers"],
        vec!["springer"],
        vec!["elsevier"],
        vec!["wiley"],
        vec!["taylor & francis", "taylor and francis"],
        vec!["oxford university press"],
        vec!["cambridge university press"],
        vec!["mit press"],
        vec!["morgan & claypool", "morgan and claypool"],
        vec!["pmlr", "proceedings of machine learning research"],
    ]
});

/// 1.0 on exact or substring match, or when both names belong to the same
/// canonical-synonym group; 0.0 otherwise (including when either is absent).
pub fn publisher_agreement(a: Option<&str>, b: Option<&str>) -> f64 {
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a.trim().to_lowercase(), b.trim().to_lowercase()),
        _ => return 0.0,
    };
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b || a.contains(&b) || b.contains(&a) {
        return 1.0;
    }
    for group in PUBLISHER_SYNONYMS.iter() {
        let a_hit = group.iter().any(|alias| a.contains(alias));
        let b_hit = group.iter().any(|alias| b.contains(alias));
        if a_hit && b_hit {
            return 1.0;
        }
    }
    0.0
}

/// Score one candidate against a query.
///
/// `publisher` is the caller's publisher hint (an existing BibTeX field at
/// the enrichment call site); plain search has none and passes `None`.
pub fn score_candidate(
    query: &Query,
    publisher: Option<&str>,
    candidate: &CandidateRecord,
    weights: ScoreWeights,
) -> f64 {
    let title = title_similarity(&query.title, &candidate.title);
    let year = year_proximity(query.year, candidate.year);
    let authors = surname_overlap(&query.authors, &candidate.surnames());
    let pub_score = publisher_agreement(publisher, candidate.publisher.as_deref());

    weights.title * title + weights.year * year + weights.authors * authors
        + weights.publisher * pub_score
}

/// Pick the best-scoring candidate. Highest score wins; ties keep the
/// first-seen candidate, so the result is stable in input order.
pub fn best_candidate(
    query: &Query,
    publisher: Option<&str>,
    candidates: &[CandidateRecord],
    weights: ScoreWeights,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let score = score_candidate(query, publisher, candidate, weights);
        match best {
            Some((_, s)) if score <= s => {}
            _ => best = Some((i, score)),
        }
    }
    best
}
