//! DOI-based enrichment: fill and normalize citation fields from
//! authoritative CrossRef metadata.
//!
//! Every fill rule applies only when the target field is currently empty:
//! enrichment completes a record, it never overwrites what a provider or
//! the document itself already said.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::authors::surnames_from_field;
use crate::bibtex::{CitationEntry, EntryType};
use crate::matching::{best_candidate, normalize_title, ENRICH_WEIGHTS};
use crate::provider::{CandidateAuthor, CandidateRecord, ProviderError};
use crate::rate_limit::Pacing;
use crate::Query;

/// Default acceptance threshold for enrichment matching. Deliberately a
/// separate constant from the search-selection threshold: the two call
/// sites tolerate different false-positive costs.
pub const ENRICH_MIN_SCORE: f64 = 0.72;

const CROSSREF_BASE: &str = "https://api.crossref.org/works";

const SELECT_FIELDS: &str =
    "DOI,title,author,issued,container-title,publisher,page,volume,issue,type,ISSN,ISBN";

/// Canonical publisher names and their addresses. Entries with `None` are
/// known publishers that carry no address.
static PUBLISHER_ADDRESS: Lazy<Vec<(&'static str, Option<&'static str>)>> = Lazy::new(|| {
    vec![
        ("Association for Computing Machinery", Some("New York, NY, USA")),
        ("ACM", Some("New York, NY, USA")),
        ("IEEE", Some("Piscataway, NJ, USA")),
        ("Springer Nature", Some("Cham, Switzerland")),
        ("Springer", Some("Cham, Switzerland")),
        ("Elsevier", Some("Amsterdam, Netherlands")),
        ("PMLR", None),
        ("Morgan & Claypool", Some("San Rafael, CA, USA")),
        ("MIT Press", Some("Cambridge, MA, USA")),
        ("Cambridge University Press", Some("Cambridge, UK")),
        ("Oxford University Press", Some("Oxford, UK")),
        ("Taylor & Francis", Some("Abingdon, UK")),
        ("Wiley", Some("Hoboken, NJ, USA")),
    ]
});

/// Venue substrings that identify the publisher when the entry has none.
static VENUE_TO_PUBLISHER: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("chi", "ACM"),
        ("uist", "ACM"),
        ("cscw", "ACM"),
        ("ubicomp", "ACM"),
        ("siggraph", "ACM"),
        ("sigir", "ACM"),
        ("kdd", "ACM"),
        ("sigcomm", "ACM"),
        ("osdi", "ACM"),
        ("sosp", "ACM"),
        ("nsdi", "ACM"),
        ("icml", "ACM"),
        ("neurips", "ACM"),
        ("icra", "IEEE"),
        ("iros", "IEEE"),
        ("icassp", "IEEE"),
        ("infocom", "IEEE"),
        ("computer graphics forum", "Wiley"),
        ("computers in human behavior", "Elsevier"),
    ]
});

pub struct Enricher {
    client: reqwest::Client,
    base_url: String,
    pacing: Pacing,
    mailto: Option<String>,
    min_score: f64,
    timeout: Duration,
}

impl Enricher {
    pub fn new(client: reqwest::Client, pacing: Pacing, mailto: Option<String>) -> Self {
        Self {
            client,
            base_url: CROSSREF_BASE.to_string(),
            pacing,
            mailto,
            min_score: ENRICH_MIN_SCORE,
            timeout: Duration::from_secs(20),
        }
    }

    /// Point at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    fn user_agent(&self) -> String {
        match &self.mailto {
            Some(mailto) => format!("bibscout/0.2 (mailto:{mailto})"),
            None => "bibscout/0.2".to_string(),
        }
    }

    /// Fill and normalize `entry` in place. Fetch failures are logged and
    /// leave the entry unchanged apart from local normalization; an
    /// enrichment miss is never an error.
    pub async fn enrich(&self, entry: &mut CitationEntry) {
        let existing_doi = entry
            .get("doi")
            .map(|d| d.trim().trim_start_matches("https://doi.org/").to_string())
            .filter(|d| !d.is_empty());

        let meta = match existing_doi {
            Some(doi) => self.fetch_doi_metadata(&doi).await,
            None => match self.locate_doi(entry).await {
                Some(doi) => self.fetch_doi_metadata(&doi).await,
                None => None,
            },
        };

        if let Some(meta) = meta {
            apply_metadata(entry, &meta);
        }
        normalize_acm_pages(entry);
        normalize_publisher_address(entry);
    }

    /// Find a DOI for an entry that has none: CrossRef title query, scored
    /// with the four-term blend, accepted only above `min_score`.
    async fn locate_doi(&self, entry: &CitationEntry) -> Option<String> {
        let query = query_from_entry(entry);
        if normalize_title(&query.title).is_empty() {
            return None;
        }

        let candidates = match self.query_crossref(&query).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(title = %query.title, error = %e, "CrossRef search failed");
                return None;
            }
        };

        let publisher = entry.get("publisher");
        match best_candidate(&query, publisher, &candidates, ENRICH_WEIGHTS) {
            Some((idx, score)) if score > self.min_score => {
                let doi = candidates[idx].doi.clone();
                tracing::debug!(title = %query.title, score, doi = ?doi, "accepted enrichment match");
                doi
            }
            Some((_, score)) => {
                tracing::debug!(title = %query.title, score, "no candidate above enrichment threshold");
                None
            }
            None => None,
        }
    }

    async fn query_crossref(&self, query: &Query) -> Result<Vec<CandidateRecord>, ProviderError> {
        let mut url = format!(
            "{}?query.title={}&rows=8&select={}",
            self.base_url,
            urlencoding::encode(&clean_query_title(&query.title)),
            SELECT_FIELDS
        );
        if let Some(year) = query.year {
            url.push_str(&format!(
                "&filter=from-pub-date:{},until-pub-date:{}",
                year - 1,
                year + 1
            ));
        }

        self.pacing.pause().await;
        let resp = self
            .client
            .get(&url)
            .header("User-Agent", self.user_agent())
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let data: serde_json::Value = resp.json().await?;
        let items = data["message"]["items"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().filter_map(crossref_work).collect())
    }

    /// Full metadata for one DOI (`works/{doi}`, `message` object).
    async fn fetch_doi_metadata(&self, doi: &str) -> Option<CandidateRecord> {
        let url = format!("{}/{}", self.base_url, doi);
        self.pacing.pause().await;

        let resp = self
            .client
            .get(&url)
            .header("User-Agent", self.user_agent())
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await;

        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(doi, status = %r.status(), "DOI metadata fetch failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(doi, error = %e, "DOI metadata fetch failed");
                return None;
            }
        };

        let data: serde_json::Value = match resp.json().await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(doi, error = %e, "malformed DOI metadata");
                return None;
            }
        };
        crossref_work(&data["message"])
    }
}

/// Strip braces/brackets and punctuation so the title survives as a clean
/// API query term.
fn clean_query_title(title: &str) -> String {
    static BRACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[{}()\[\]]").unwrap());
    static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
    static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

    let cleaned = BRACES.replace_all(title, "");
    let cleaned = NON_WORD.replace_all(&cleaned, " ");
    WS.replace_all(cleaned.trim(), " ").to_string()
}

/// Rebuild a scoring query from an entry's existing fields.
fn query_from_entry(entry: &CitationEntry) -> Query {
    let title = entry
        .get("title")
        .unwrap_or_default()
        .trim_matches(|c| c == '{' || c == '}')
        .to_string();
    let year = entry
        .get("year")
        .and_then(|y| y.trim().get(..4))
        .and_then(|y| y.parse().ok());
    let authors = entry
        .get("author")
        .map(surnames_from_field)
        .unwrap_or_default();

    Query {
        title,
        year,
        doi: None,
        authors,
    }
}

fn crossref_year(item: &serde_json::Value) -> Option<i32> {
    for key in ["issued", "published-print", "published-online"] {
        if let Some(year) = item[key]["date-parts"][0][0].as_i64() {
            return Some(year as i32);
        }
    }
    None
}

fn map_crossref_type(work_type: Option<&str>) -> EntryType {
    match work_type.unwrap_or("") {
        "journal-article" => EntryType::Article,
        "proceedings-article" => EntryType::Inproceedings,
        "book" | "monograph" => EntryType::Book,
        "book-chapter" => EntryType::Inbook,
        "dissertation" => EntryType::Phdthesis,
        "report" => EntryType::Techreport,
        "posted-content" => EntryType::Unpublished,
        _ => EntryType::Article,
    }
}

/// Lift one CrossRef work object into a [`CandidateRecord`].
fn crossref_work(item: &serde_json::Value) -> Option<CandidateRecord> {
    let title = match &item["title"] {
        serde_json::Value::Array(arr) => arr.first().and_then(|v| v.as_str()),
        serde_json::Value::String(s) => Some(s.as_str()),
        _ => None,
    }
    .filter(|t| !t.trim().is_empty())?;

    let authors: Vec<CandidateAuthor> = item["author"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|a| CandidateAuthor {
                    given: a["given"].as_str().unwrap_or("").to_string(),
                    family: a["family"].as_str().unwrap_or("").to_string(),
                })
                .filter(|a| !a.family.is_empty() || !a.given.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let container = match &item["container-title"] {
        serde_json::Value::Array(arr) => arr.first().and_then(|v| v.as_str()),
        serde_json::Value::String(s) => Some(s.as_str()),
        _ => None,
    };

    let string_or_number = |v: &serde_json::Value| -> Option<String> {
        v.as_str()
            .map(String::from)
            .or_else(|| v.as_i64().map(|n| n.to_string()))
    };

    Some(CandidateRecord {
        doi: item["DOI"].as_str().map(String::from),
        title: title.to_string(),
        authors,
        year: crossref_year(item),
        venue: container.map(String::from),
        publisher: item["publisher"].as_str().map(String::from),
        pages: item["page"].as_str().map(String::from),
        volume: string_or_number(&item["volume"]),
        issue: string_or_number(&item["issue"]),
        issn: item["ISSN"][0].as_str().map(String::from),
        isbn: item["ISBN"][0].as_str().map(String::from),
        entry_type: map_crossref_type(item["type"].as_str()),
    })
}

/// Collapse dash variants in a page range to the BibTeX double hyphen.
fn normalize_page_dashes(pages: &str) -> String {
    static DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-–—]+").unwrap());
    DASHES.replace_all(pages.trim(), "--").to_string()
}

/// Fill empty fields of `entry` from authoritative metadata.
pub fn apply_metadata(entry: &mut CitationEntry, meta: &CandidateRecord) {
    if let Some(ref doi) = meta.doi {
        entry.set_if_empty("doi", doi.as_str());
    }
    if let Some(ref publisher) = meta.publisher {
        entry.set_if_empty("publisher", publisher.as_str());
    }

    if entry.is_empty_field("author") && !meta.authors.is_empty() {
        let rendered: Vec<String> = meta
            .authors
            .iter()
            .take(10)
            .map(|a| a.display_name())
            .filter(|a| !a.is_empty())
            .collect();
        if !rendered.is_empty() {
            entry.set("author", rendered.join(" and "));
        }
    }

    if let Some(ref venue) = meta.venue {
        if entry.is_empty_field("journal") && entry.is_empty_field("booktitle") {
            match entry.entry_type {
                EntryType::Article => entry.set("journal", venue.as_str()),
                EntryType::Inproceedings => entry.set("booktitle", venue.as_str()),
                _ => {}
            }
        }
    }

    if let Some(ref volume) = meta.volume {
        entry.set_if_empty("volume", volume.as_str());
    }
    if entry.entry_type == EntryType::Article {
        if let Some(ref issue) = meta.issue {
            entry.set_if_empty("number", issue.as_str());
        }
        if let Some(ref issn) = meta.issn {
            entry.set_if_empty("issn", issn.as_str());
        }
    }
    if let Some(ref isbn) = meta.isbn {
        entry.set_if_empty("isbn", isbn.as_str());
    }
    if let Some(ref pages) = meta.pages {
        if entry.is_empty_field("pages") {
            entry.set("pages", normalize_page_dashes(pages));
        }
    }

    // Proceedings entries carry either a volume or an issue number, not both.
    if entry.entry_type == EntryType::Inproceedings
        && !entry.is_empty_field("volume")
        && !entry.is_empty_field("number")
    {
        entry.remove("number");
    }
}

static ACM_PAGES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*:\s*1\s*[-–—]+\s*(\d+)\s*:\s*(\d+)\s*$").unwrap());

/// Collapse ACM-style page ranges of the exact form `N:1--N:M` into
/// `articleno = N, numpages = M`, dropping `pages`. Any other page format
/// is left untouched.
pub fn normalize_acm_pages(entry: &mut CitationEntry) {
    let Some(pages) = entry.get("pages") else { return };
    let Some(caps) = ACM_PAGES_RE.captures(pages) else {
        return;
    };
    if caps[1] != caps[2] {
        return;
    }

    let articleno = caps[1].to_string();
    let numpages = caps[3].to_string();
    entry.remove("pages");
    entry.set("articleno", articleno);
    entry.set("numpages", numpages);
}

/// Map a known publisher spelling to its canonical form.
pub fn canonical_publisher(name: &str) -> Option<&'static str> {
    let lower = name.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if lower == "acm" || lower.contains("association for computing machinery") {
        return Some("Association for Computing Machinery");
    }
    if lower == "ieee" || lower.contains("institute of electrical and electronics engineers") {
        return Some("IEEE");
    }
    if lower.contains("springer") {
        return Some(if lower.contains("nature") {
            "Springer Nature"
        } else {
            "Springer"
        });
    }
    if lower.contains("elsevier") {
        return Some("Elsevier");
    }
    if lower.contains("wiley") {
        return Some("Wiley");
    }
    if lower.contains("cambridge") && lower.contains("press") {
        return Some("Cambridge University Press");
    }
    if lower.contains("oxford") && lower.contains("press") {
        return Some("Oxford University Press");
    }
    if lower.contains("taylor") && lower.contains("francis") {
        return Some("Taylor & Francis");
    }
    if lower.contains("morgan") && lower.contains("claypool") {
        return Some("Morgan & Claypool");
    }
    if lower.contains("mit press") {
        return Some("MIT Press");
    }
    None
}

/// True when `venue` mentions `key`: whole-word for short acronym keys,
/// substring for multi-word names.
fn venue_mentions(venue: &str, key: &str) -> bool {
    if key.contains(' ') {
        venue.contains(key)
    } else {
        venue
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == key)
    }
}

/// Canonicalize the publisher name and fill the address from the fixed
/// table. When the entry has no publisher at all, a known venue name can
/// supply one first. Unknown publishers get no address.
pub fn normalize_publisher_address(entry: &mut CitationEntry) {
    let mut publisher = entry
        .get("publisher")
        .map(|p| p.trim_matches(|c| c == '{' || c == '}').trim().to_string())
        .filter(|p| !p.is_empty());

    if publisher.is_none() {
        let venue = entry
            .get("booktitle")
            .or_else(|| entry.get("journal"))
            .unwrap_or_default()
            .to_lowercase();
        if !venue.is_empty() {
            for (key, inferred) in VENUE_TO_PUBLISHER.iter() {
                if venue_mentions(&venue, key) {
                    publisher = Some(inferred.to_string());
                    break;
                }
            }
        }
    }

    let Some(publisher) = publisher else { return };

    let canonical = canonical_publisher(&publisher)
        .map(String::from)
        .unwrap_or(publisher);
    entry.set("publisher", canonical.as_str());

    if !entry.is_empty_field("address") {
        return;
    }
    let canonical_lower = canonical.to_lowercase();
    for (key, address) in PUBLISHER_ADDRESS.iter() {
        let key_lower = key.to_lowercase();
        if canonical_lower.contains(&key_lower) || key_lower.contains(&canonical_lower) {
            if let Some(address) = address {
                entry.set("address", *address);
            }
            break;
        }
    }
}
