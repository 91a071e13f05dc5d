use thiserror::Error;

pub mod authors;
pub mod bibtex;
pub mod cache;
pub mod convert;
pub mod enrich;
pub mod matching;
pub mod provider;
pub mod rate_limit;
pub mod resolver;

// Re-export for convenience
pub use bibtex::{generate_key, CitationEntry, EntryType};
pub use cache::{BibCache, CacheStats, JsonFileStore, DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS};
pub use enrich::{Enricher, ENRICH_MIN_SCORE};
pub use matching::{normalize_title, ScoreWeights, ENRICH_WEIGHTS, SEARCH_MIN_SCORE, SEARCH_WEIGHTS};
pub use provider::{CandidateAuthor, CandidateRecord, MetadataProvider, ProviderError};
pub use rate_limit::Pacing;
pub use resolver::{Mode, Outcome, Resolution, Resolver, RunStats, Source};

/// A metadata query for one citation: either the document's own metadata or
/// a single entry parsed out of a reference list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub title: String,
    pub year: Option<i32>,
    pub doi: Option<String>,
    /// Surname-normalized author list, order preserved.
    pub authors: Vec<String>,
}

impl Query {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    /// A query must carry a usable title or a DOI before any provider call.
    pub fn validate(&self) -> Result<(), CoreError> {
        if matching::normalize_title(&self.title).is_empty() && self.doi.is_none() {
            return Err(CoreError::InvalidQuery);
        }
        Ok(())
    }

    /// Cache key over the (title, year, doi) triple, joined by `::`.
    ///
    /// The author list is deliberately excluded so callers that know
    /// different subsets of the authors share cache hits.
    pub fn cache_key(&self) -> String {
        format!(
            "{}::{}::{}",
            self.title,
            self.year.map(|y| y.to_string()).unwrap_or_default(),
            self.doi.as_deref().unwrap_or_default()
        )
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("query has neither a usable title nor a DOI")]
    InvalidQuery,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_ignores_authors() {
        let a = Query::new("Deep Learning")
            .with_year(2023)
            .with_authors(vec!["doe".into()]);
        let b = Query::new("Deep Learning").with_year(2023);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "Deep Learning::2023::");
    }

    #[test]
    fn cache_key_is_stable_per_triple() {
        let q = Query::new("T").with_year(2020).with_doi("10.1/x");
        assert_eq!(q.cache_key(), "T::2020::10.1/x");
        assert_eq!(q.cache_key(), q.clone().cache_key());
    }

    #[test]
    fn query_without_title_or_doi_is_invalid() {
        assert!(Query::new("").validate().is_err());
        assert!(Query::new("???").validate().is_err());
        assert!(Query::new("").with_doi("10.1/x").validate().is_ok());
        assert!(Query::new("A real title").validate().is_ok());
    }
}
