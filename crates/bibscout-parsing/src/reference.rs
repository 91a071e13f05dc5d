//! Per-entry reference parsing: raw citation text to a resolution query.

use once_cell::sync::Lazy;
use regex::Regex;

use bibscout_core::authors::surname;
use bibscout_core::Query;

/// One segmented reference with the query hints extracted from it.
#[derive(Debug, Clone)]
pub struct ParsedReference {
    pub raw: String,
    pub query: Query,
}

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static DOI_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)https?://doi\.org/(\S+)").unwrap(),
        Regex::new(r"(?i)\bdoi:\s*(\S+)").unwrap(),
        Regex::new(r"\b(10\.\d{4,9}/\S+)\b").unwrap(),
    ]
});

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());

/// Extract a DOI from reference text, stripping any `doi.org` prefix and
/// decoding the common percent-escapes.
pub fn extract_doi(text: &str) -> Option<String> {
    for re in DOI_PATTERNS.iter() {
        if let Some(caps) = re.captures(text) {
            let doi = caps.get(1).unwrap().as_str();
            let doi = doi.trim_start_matches("https://doi.org/");
            let doi = doi.replace("%2F", "/").replace("%3A", ":");
            return Some(doi.trim().to_string());
        }
    }
    None
}

/// Split an author-list fragment into normalized surnames.
fn parse_authors(text: &str) -> Vec<String> {
    let text = text.replace('&', "and");

    // Cut at "et al" (any punctuation variant).
    let lower = text.to_lowercase();
    let text = match lower.find("et al") {
        Some(pos) => text[..pos].to_string(),
        None => text,
    };

    let mut authors = Vec::new();
    for part in text.split(" and ") {
        for token in part.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let name = surname(token);
            let name = name.trim_end_matches('.').trim();
            // Single letters are stray initials, not surnames.
            if name.len() > 1 {
                authors.push(name.to_string());
            }
        }
    }
    authors
}

/// Pull the most plausible title span out of post-year reference text:
/// a quoted span, else the first sentence, else a 15-word prefix.
fn extract_title(text: &str) -> String {
    static QUOTED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"["“”]+([^"“”]+)["“”]+"#).unwrap());
    if let Some(caps) = QUOTED.captures(text) {
        return caps[1].trim().to_string();
    }

    static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\s+").unwrap());
    let first = SENTENCE_END.splitn(text, 2).next().unwrap_or("").trim();
    if first.len() > 10 {
        // Drop a trailing ", Journal Name," fragment.
        static JOURNAL_TAIL: Lazy<Regex> =
            Lazy::new(|| Regex::new(r",\s+[A-Z][a-zA-Z\s]+,\s*$").unwrap());
        return JOURNAL_TAIL.replace(first, "").trim().to_string();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= 15 {
        text.trim().to_string()
    } else {
        words[..15].join(" ")
    }
}

/// Parse one raw reference into query hints.
///
/// The text before a 4-digit year is treated as the author list, the text
/// after it as the title candidate. A reference with no recognizable year
/// keeps the whole cleaned text as its title candidate.
pub fn parse_reference(raw: &str) -> ParsedReference {
    let clean = raw
        .trim()
        .trim_start_matches(|c| c == '-' || c == ' ')
        .trim();
    let text = WS_RE.replace_all(clean, " ").to_string();

    let doi = extract_doi(&text);

    let query = match YEAR_RE.find(&text) {
        Some(year_match) => {
            let year = year_match.as_str().parse().ok();

            let before = text[..year_match.start()]
                .trim()
                .trim_end_matches(|c| c == '.' || c == '(' || c == ')' || c == ' ');
            let authors = if before.is_empty() {
                Vec::new()
            } else {
                parse_authors(before)
            };

            let after = text[year_match.end()..]
                .trim_start_matches(|c| c == '.' || c == ' ' || c == '(' || c == ')');
            let title = extract_title(after);

            Query {
                title,
                year,
                doi,
                authors,
            }
        }
        None => Query {
            title: text.clone(),
            year: None,
            doi,
            authors: Vec::new(),
        },
    };

    ParsedReference {
        raw: raw.to_string(),
        query,
    }
}
