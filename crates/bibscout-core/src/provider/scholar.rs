//! Scholarly web-search fallback provider.
//!
//! Drives the public search UI over HTTP: submit the query, locate the first
//! result's citation-export control, open the cite dialog, follow its BibTeX
//! link, and parse the exported text. Slow and fragile next to the API path;
//! the engine only reaches for it when the primary provider comes up empty
//! and the caller's mode allows it.
//!
//! A [`ScholarSession`] is an explicit owned handle. It must not be shared
//! across concurrent queries (use one session per worker) and is released
//! by dropping it, on every exit path.

use std::time::Duration;

use scraper::{Html, Selector};

use super::{CandidateAuthor, CandidateRecord, MetadataProvider, ProviderError, ProviderFuture};
use crate::bibtex::{parse_bibtex, CitationEntry};
use crate::rate_limit::Pacing;
use crate::Query;

const SCHOLAR_BASE: &str = "https://scholar.google.com";

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One search-engine session: owns the HTTP client and its pacing policy.
pub struct ScholarSession {
    client: reqwest::Client,
    base_url: String,
    pacing: Pacing,
    timeout: Duration,
}

impl ScholarSession {
    pub fn connect(pacing: Pacing) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: SCHOLAR_BASE.to_string(),
            pacing,
            timeout: Duration::from_secs(15),
        })
    }

    /// Point at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch a page, retrying once past a bot-challenge interstitial.
    async fn fetch_checked(&self, url: &str) -> Result<String, ProviderError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.pacing.pause().await;

            let resp = self
                .client
                .get(url)
                .header("User-Agent", BROWSER_UA)
                .timeout(self.timeout)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(ProviderError::Status(status.as_u16()));
            }

            let body = resp.text().await?;
            if !is_challenge(&body) {
                return Ok(body);
            }
            if attempts >= self.pacing.max_attempts {
                return Err(ProviderError::BotChallenge);
            }
            tracing::warn!("bot challenge page detected, waiting before one retry");
            self.pacing.challenge_wait().await;
        }
    }

    async fn run_search(&self, search_term: &str) -> Result<Option<CandidateRecord>, ProviderError> {
        let url = format!(
            "{}/scholar?hl=en&q={}",
            self.base_url,
            urlencoding::encode(search_term)
        );
        let results_page = self.fetch_checked(&url).await?;

        let Some(cid) = first_result_cid(&results_page) else {
            tracing::debug!(query = search_term, "no search results");
            return Ok(None);
        };

        let cite_url = format!(
            "{}/scholar?q=info:{}:scholar.google.com/&output=cite",
            self.base_url, cid
        );
        let cite_page = self.fetch_checked(&cite_url).await?;

        let Some(link) = bibtex_link(&cite_page) else {
            tracing::debug!(query = search_term, "no BibTeX export link");
            return Ok(None);
        };
        let link = if link.starts_with('/') {
            format!("{}{}", self.base_url, link)
        } else {
            link
        };

        let export_page = self.fetch_checked(&link).await?;
        let Some(bibtex) = extract_bibtex_text(&export_page) else {
            tracing::debug!(query = search_term, "export page had no BibTeX content");
            return Ok(None);
        };

        Ok(parse_bibtex(&bibtex).map(|entry| record_from_entry(&entry)))
    }

    async fn search_impl(&self, query: &Query) -> Result<Option<CandidateRecord>, ProviderError> {
        let mut term = format!("\"{}\"", query.title);
        if let Some(year) = query.year {
            term.push(' ');
            term.push_str(&year.to_string());
        }
        self.run_search(&term).await
    }
}

impl MetadataProvider for ScholarSession {
    fn name(&self) -> &str {
        "Scholar"
    }

    fn search<'a>(
        &'a self,
        query: &'a Query,
    ) -> ProviderFuture<'a, Result<Option<CandidateRecord>, ProviderError>> {
        Box::pin(self.search_impl(query))
    }

    fn search_by_doi<'a>(
        &'a self,
        doi: &'a str,
    ) -> ProviderFuture<'a, Result<Option<CandidateRecord>, ProviderError>> {
        // No DOI endpoint on the search UI; the DOI string itself is an
        // effective exact query.
        Box::pin(self.run_search(doi))
    }
}

fn is_challenge(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains("captcha") || lower.contains("unusual traffic")
}

/// The first result's citation-export id (`data-cid` on the result block).
fn first_result_cid(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("div.gs_r[data-cid]").ok()?;
    doc.select(&selector)
        .next()
        .and_then(|el| el.value().attr("data-cid"))
        .map(String::from)
}

/// Href of the export link labeled "BibTeX" in the cite dialog.
fn bibtex_link(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("a.gs_citi").ok()?;
    for el in doc.select(&selector) {
        let text: String = el.text().collect();
        if text.to_lowercase().contains("bibtex") {
            return el.value().attr("href").map(String::from);
        }
    }
    None
}

/// The exported citation text: a `<pre>` element, or the raw body when the
/// endpoint serves plain text.
fn extract_bibtex_text(body: &str) -> Option<String> {
    {
        let doc = Html::parse_document(body);
        if let Ok(selector) = Selector::parse("pre") {
            if let Some(el) = doc.select(&selector).next() {
                let text: String = el.text().collect();
                if !text.trim().is_empty() {
                    return Some(text.trim().to_string());
                }
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.starts_with('@') {
        return Some(trimmed.to_string());
    }
    None
}

/// Lift a parsed BibTeX entry into the provider result shape.
fn record_from_entry(entry: &CitationEntry) -> CandidateRecord {
    let authors: Vec<CandidateAuthor> = entry
        .get("author")
        .map(|field| {
            field
                .split(" and ")
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(CandidateAuthor::from_display)
                .collect()
        })
        .unwrap_or_default();

    CandidateRecord {
        doi: entry.get("doi").map(String::from),
        title: entry.get("title").unwrap_or_default().to_string(),
        authors,
        year: entry.get("year").and_then(|y| y.trim().parse().ok()),
        venue: entry
            .get("journal")
            .or_else(|| entry.get("booktitle"))
            .map(String::from),
        publisher: entry.get("publisher").map(String::from),
        pages: entry.get("pages").map(String::from),
        volume: entry.get("volume").map(String::from),
        issue: entry.get("number").map(String::from),
        issn: None,
        isbn: None,
        entry_type: entry.entry_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_challenge() {
        assert!(is_challenge("<html>Please solve this CAPTCHA</html>"));
        assert!(is_challenge("unusual traffic from your network"));
        assert!(!is_challenge("<html>Search results</html>"));
    }

    #[test]
    fn test_first_result_cid() {
        let html = r#"<html><body>
            <div class="gs_r gs_or gs_scl" data-cid="AbC123xyz"><h3>Paper</h3></div>
            <div class="gs_r gs_or gs_scl" data-cid="second"><h3>Other</h3></div>
        </body></html>"#;
        assert_eq!(first_result_cid(html).as_deref(), Some("AbC123xyz"));
    }

    #[test]
    fn test_first_result_cid_missing() {
        assert_eq!(first_result_cid("<html><body>Nothing</body></html>"), None);
    }

    #[test]
    fn test_bibtex_link() {
        let html = r#"<html><body>
            <a class="gs_citi" href="/export?format=ris">RefMan</a>
            <a class="gs_citi" href="https://example.org/export?format=bibtex">BibTeX</a>
        </body></html>"#;
        assert_eq!(
            bibtex_link(html).as_deref(),
            Some("https://example.org/export?format=bibtex")
        );
    }

    #[test]
    fn test_extract_bibtex_from_pre() {
        let html = "<html><body><pre>@article{x,\n  title = {X}\n}</pre></body></html>";
        let text = extract_bibtex_text(html).unwrap();
        assert!(text.starts_with("@article"));
    }

    #[test]
    fn test_extract_bibtex_raw_body() {
        let body = "@inproceedings{y,\n  title = {Y}\n}";
        assert_eq!(extract_bibtex_text(body).as_deref(), Some(body));
    }

    #[test]
    fn test_extract_bibtex_none() {
        assert_eq!(extract_bibtex_text("<html><body>no export</body></html>"), None);
    }

    #[test]
    fn test_record_from_entry() {
        let src = "@inproceedings{smith2022example,\n  title = {Example Paper},\n  author = {Smith, Alice and Jones, Bob},\n  year = {2022},\n  booktitle = {Proceedings of Examples},\n  pages = {1--12}\n}";
        let entry = parse_bibtex(src).unwrap();
        let record = record_from_entry(&entry);
        assert_eq!(record.title, "Example Paper");
        assert_eq!(record.year, Some(2022));
        assert_eq!(record.authors.len(), 2);
        assert_eq!(record.authors[0].family, "Smith");
        assert_eq!(record.venue.as_deref(), Some("Proceedings of Examples"));
        assert_eq!(record.pages.as_deref(), Some("1--12"));
    }
}
