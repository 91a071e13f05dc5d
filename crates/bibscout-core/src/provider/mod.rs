//! Metadata provider capability and shared result types.
//!
//! Two interchangeable implementations sit behind [`MetadataProvider`]: the
//! structured-API [`openalex::OpenAlexProvider`] (fast, rate-limited JSON)
//! and the [`scholar::ScholarSession`] fallback (slow, fragile, only used
//! when the API path is exhausted and the caller's mode allows it). New
//! providers plug in without touching the resolution engine.

pub mod mock;
pub mod openalex;
pub mod scholar;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::authors::normalize_surname;
use crate::bibtex::EntryType;
use crate::Query;

/// Boxed future type returned by provider trait methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One author as reported by a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateAuthor {
    pub given: String,
    pub family: String,
}

impl CandidateAuthor {
    /// Render as `"Family, Given"`, degrading to whichever part exists.
    pub fn display_name(&self) -> String {
        match (self.family.is_empty(), self.given.is_empty()) {
            (false, false) => format!("{}, {}", self.family, self.given),
            (false, true) => self.family.clone(),
            (true, false) => self.given.clone(),
            (true, true) => String::new(),
        }
    }

    /// Split a display name in either `"Family, Given"` or `"Given Family"`
    /// form.
    pub fn from_display(name: &str) -> Self {
        let name = name.trim();
        if let Some((family, given)) = name.split_once(',') {
            return Self {
                given: given.trim().to_string(),
                family: family.trim().to_string(),
            };
        }
        match name.rsplit_once(' ') {
            Some((given, family)) => Self {
                given: given.trim().to_string(),
                family: family.trim().to_string(),
            },
            None => Self {
                given: String::new(),
                family: name.to_string(),
            },
        }
    }
}

/// Raw metadata returned by one provider for one query. Produced fresh per
/// call and never mutated; scoring and enrichment work on copies.
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub doi: Option<String>,
    pub title: String,
    pub authors: Vec<CandidateAuthor>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub publisher: Option<String>,
    pub pages: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub issn: Option<String>,
    pub isbn: Option<String>,
    pub entry_type: EntryType,
}

impl Default for CandidateRecord {
    fn default() -> Self {
        Self {
            doi: None,
            title: String::new(),
            authors: Vec::new(),
            year: None,
            venue: None,
            publisher: None,
            pages: None,
            volume: None,
            issue: None,
            issn: None,
            isbn: None,
            entry_type: EntryType::Article,
        }
    }
}

impl CandidateRecord {
    /// Normalized author surnames, for overlap scoring.
    pub fn surnames(&self) -> Vec<String> {
        self.authors
            .iter()
            .map(|a| {
                if a.family.is_empty() {
                    normalize_surname(&a.given)
                } else {
                    normalize_surname(&a.family)
                }
            })
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("bot challenge page not cleared after retry")]
    BotChallenge,
}

/// A metadata source that can resolve a query to a candidate record.
///
/// `search` returns at most one candidate: the provider's own best match
/// above its confidence threshold, or `None`. Errors are for the engine to
/// log and treat as "no result"; they never abort a resolution batch.
pub trait MetadataProvider: Send + Sync {
    /// Canonical provider name, for logs and provenance.
    fn name(&self) -> &str;

    /// Fuzzy search by title (plus year/author hints from the query).
    fn search<'a>(
        &'a self,
        query: &'a Query,
    ) -> ProviderFuture<'a, Result<Option<CandidateRecord>, ProviderError>>;

    /// Direct lookup by DOI.
    fn search_by_doi<'a>(
        &'a self,
        doi: &'a str,
    ) -> ProviderFuture<'a, Result<Option<CandidateRecord>, ProviderError>>;
}
