//! OpenAlex works-API provider: the primary, structured resolution path.

use std::time::Duration;

use super::{CandidateAuthor, CandidateRecord, MetadataProvider, ProviderError, ProviderFuture};
use crate::bibtex::EntryType;
use crate::matching::{best_candidate, SEARCH_MIN_SCORE, SEARCH_WEIGHTS};
use crate::rate_limit::Pacing;
use crate::Query;

const OPENALEX_BASE: &str = "https://api.openalex.org";

const SELECT_FIELDS: &str =
    "id,title,display_name,authorships,publication_year,biblio,doi,primary_location,type";

pub struct OpenAlexProvider {
    client: reqwest::Client,
    base_url: String,
    pacing: Pacing,
    mailto: Option<String>,
    timeout: Duration,
}

impl OpenAlexProvider {
    pub fn new(client: reqwest::Client, pacing: Pacing, mailto: Option<String>) -> Self {
        Self {
            client,
            base_url: OPENALEX_BASE.to_string(),
            pacing,
            mailto,
            timeout: Duration::from_secs(10),
        }
    }

    /// Point at a different endpoint (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn user_agent(&self) -> String {
        match &self.mailto {
            Some(mailto) => format!("bibscout/0.2 (mailto:{mailto})"),
            None => "bibscout/0.2".to_string(),
        }
    }

    async fn fetch_works(&self, url: &str) -> Result<Vec<CandidateRecord>, ProviderError> {
        self.pacing.pause().await;

        let resp = self
            .client
            .get(url)
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
        let works = data["results"].as_array().cloned().unwrap_or_default();
        Ok(works.iter().filter_map(parse_work).collect())
    }

    async fn search_impl(&self, query: &Query) -> Result<Option<CandidateRecord>, ProviderError> {
        let mut url = format!(
            "{}/works?search={}&per-page=10&select={}",
            self.base_url,
            urlencoding::encode(&query.title),
            SELECT_FIELDS
        );
        if let Some(year) = query.year {
            url.push_str(&format!("&filter=publication_year:{year}"));
        }

        let candidates = self.fetch_works(&url).await?;
        match best_candidate(query, None, &candidates, SEARCH_WEIGHTS) {
            Some((idx, score)) if score > SEARCH_MIN_SCORE => {
                tracing::debug!(title = %query.title, score, "confident OpenAlex match");
                Ok(candidates.into_iter().nth(idx))
            }
            Some((_, score)) => {
                tracing::debug!(title = %query.title, score, "best candidate below threshold");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn search_by_doi_impl(
        &self,
        doi: &str,
    ) -> Result<Option<CandidateRecord>, ProviderError> {
        let doi = doi.trim().trim_start_matches("https://doi.org/");
        if doi.is_empty() {
            return Ok(None);
        }

        // Some registrars index the slash-encoded form; try both spellings.
        let mut variants = vec![doi.to_string()];
        let encoded = doi.replace('/', "%2F");
        if encoded != doi {
            variants.push(encoded);
        }

        for variant in &variants {
            let url = format!(
                "{}/works?filter=doi:{}&per-page=1&select={}",
                self.base_url, variant, SELECT_FIELDS
            );
            match self.fetch_works(&url).await {
                Ok(works) if !works.is_empty() => return Ok(works.into_iter().next()),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(doi = %variant, error = %e, "DOI variant lookup failed");
                }
            }
        }

        Ok(None)
    }
}

impl MetadataProvider for OpenAlexProvider {
    fn name(&self) -> &str {
        "OpenAlex"
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
        Box::pin(self.search_by_doi_impl(doi))
    }
}

/// Map an OpenAlex work type onto a BibTeX entry type.
fn map_work_type(work_type: Option<&str>) -> EntryType {
    match work_type.unwrap_or("") {
        "article" | "journal-article" => EntryType::Article,
        "conference-paper" | "proceedings-article" => EntryType::Inproceedings,
        "book" | "monograph" => EntryType::Book,
        "book-chapter" => EntryType::Inbook,
        "dissertation" => EntryType::Phdthesis,
        "report" => EntryType::Techreport,
        "preprint" => EntryType::Unpublished,
        _ => EntryType::Article,
    }
}

/// Lift one `works` result into a [`CandidateRecord`]. Returns `None` for
/// results without a usable title.
fn parse_work(work: &serde_json::Value) -> Option<CandidateRecord> {
    let title = work["title"]
        .as_str()
        .or_else(|| work["display_name"].as_str())
        .filter(|t| !t.trim().is_empty())?;

    let authors: Vec<CandidateAuthor> = work["authorships"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a["author"]["display_name"].as_str())
                .map(CandidateAuthor::from_display)
                .collect()
        })
        .unwrap_or_default();

    let doi = work["doi"]
        .as_str()
        .map(|d| d.trim_start_matches("https://doi.org/").to_string())
        .filter(|d| !d.is_empty());

    let source = &work["primary_location"]["source"];
    let venue = source["display_name"].as_str().map(String::from);
    let publisher = source["host_organization_name"]
        .as_str()
        .map(String::from);

    let biblio = &work["biblio"];
    let pages = match (biblio["first_page"].as_str(), biblio["last_page"].as_str()) {
        (Some(first), Some(last)) => Some(format!("{first}--{last}")),
        (Some(first), None) => Some(first.to_string()),
        _ => None,
    };

    Some(CandidateRecord {
        doi,
        title: title.to_string(),
        authors,
        year: work["publication_year"].as_i64().map(|y| y as i32),
        venue,
        publisher,
        pages,
        volume: biblio["volume"].as_str().map(String::from),
        issue: biblio["issue"].as_str().map(String::from),
        issn: None,
        isbn: None,
        entry_type: map_work_type(work["type"].as_str()),
    })
}
