//! The resolution engine: cache → DOI-direct → primary search → fallback.
//!
//! Per query the engine is strictly sequential: the fallback session is
//! stateful and rate-sensitive, so providers are never raced. Every outcome,
//! including an explicit non-result, lands in the cache keyed by the
//! original (title, year, doi) triple; negatives cache as the empty string
//! so lookups known to fail skip the expensive fallback next time.

use std::sync::Arc;

use crate::bibtex::{parse_bibtex, CitationEntry};
use crate::cache::BibCache;
use crate::matching::normalize_title;
use crate::provider::{CandidateRecord, MetadataProvider};
use crate::{CoreError, Query};

/// Whether the caller permits the interactive fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Fallback provider allowed after the primary path is exhausted.
    Interactive,
    /// Primary provider only; no confident result is final.
    NonInteractive,
}

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Primary,
    Fallback,
}

/// The terminal state of one query.
#[derive(Debug, Clone)]
pub enum Outcome {
    Resolved(CitationEntry),
    /// No confident candidate anywhere. A valid outcome, not an error.
    Unresolved,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub outcome: Outcome,
    pub source: Option<Source>,
}

impl Resolution {
    pub fn entry(&self) -> Option<&CitationEntry> {
        match &self.outcome {
            Outcome::Resolved(entry) => Some(entry),
            Outcome::Unresolved => None,
        }
    }
}

/// Per-batch accounting: every submitted query lands in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub resolved: usize,
    pub unresolved: usize,
    pub errors: usize,
}

pub struct Resolver {
    cache: Arc<BibCache>,
    primary: Arc<dyn MetadataProvider>,
    fallback: Option<Arc<dyn MetadataProvider>>,
    mode: Mode,
}

impl Resolver {
    pub fn new(
        cache: Arc<BibCache>,
        primary: Arc<dyn MetadataProvider>,
        fallback: Option<Arc<dyn MetadataProvider>>,
        mode: Mode,
    ) -> Self {
        Self {
            cache,
            primary,
            fallback,
            mode,
        }
    }

    pub fn cache(&self) -> &BibCache {
        &self.cache
    }

    /// Resolve a single query to a citation entry or an explicit
    /// unresolved outcome.
    pub async fn resolve(&self, query: &Query) -> Result<Resolution, CoreError> {
        query.validate()?;

        let key = query.cache_key();
        if let Some(cached) = self.cache.get(&key) {
            if cached.is_empty() {
                return Ok(Resolution {
                    outcome: Outcome::Unresolved,
                    source: Some(Source::Cache),
                });
            }
            if let Some(entry) = parse_bibtex(&cached) {
                return Ok(Resolution {
                    outcome: Outcome::Resolved(entry),
                    source: Some(Source::Cache),
                });
            }
            // Unparsable cached value: treat as a miss and re-resolve.
            tracing::warn!(key = %key, "dropping unparsable cache entry");
            self.cache.delete(&key);
        }

        let found = self.run_providers(query).await;

        match found {
            Some((record, source)) => {
                let entry = CitationEntry::from_candidate(&record);
                self.cache.set(&key, &entry.to_bibtex());
                Ok(Resolution {
                    outcome: Outcome::Resolved(entry),
                    source: Some(source),
                })
            }
            None => {
                self.cache.set(&key, "");
                Ok(Resolution {
                    outcome: Outcome::Unresolved,
                    source: None,
                })
            }
        }
    }

    async fn run_providers(&self, query: &Query) -> Option<(CandidateRecord, Source)> {
        // DOI-direct lookup comes before any title search.
        if let Some(doi) = query.doi.as_deref() {
            match self.primary.search_by_doi(doi).await {
                Ok(Some(record)) => return Some((record, Source::Primary)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(provider = self.primary.name(), doi, error = %e, "DOI lookup failed");
                }
            }
        }

        if !normalize_title(&query.title).is_empty() {
            match self.primary.search(query).await {
                Ok(Some(record)) => return Some((record, Source::Primary)),
                Ok(None) => {
                    tracing::debug!(provider = self.primary.name(), title = %query.title, "no confident primary result");
                }
                Err(e) => {
                    tracing::warn!(provider = self.primary.name(), title = %query.title, error = %e, "primary search failed");
                }
            }
        }

        if self.mode == Mode::NonInteractive {
            return None;
        }
        let fallback = self.fallback.as_ref()?;

        match fallback.search(query).await {
            Ok(Some(record)) => Some((record, Source::Fallback)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(provider = fallback.name(), title = %query.title, error = %e, "fallback search failed");
                None
            }
        }
    }

    /// Resolve a batch sequentially, reporting progress per query and
    /// accounting every query in the returned stats. Per-query failures
    /// (invalid queries) never abort the batch.
    pub async fn resolve_all(
        &self,
        queries: &[Query],
        mut progress: impl FnMut(usize, &Result<Resolution, CoreError>),
    ) -> (Vec<Result<Resolution, CoreError>>, RunStats) {
        let mut results = Vec::with_capacity(queries.len());
        let mut stats = RunStats::default();

        for (i, query) in queries.iter().enumerate() {
            let result = self.resolve(query).await;
            match &result {
                Ok(resolution) => match resolution.outcome {
                    Outcome::Resolved(_) => stats.resolved += 1,
                    Outcome::Unresolved => stats.unresolved += 1,
                },
                Err(_) => stats.errors += 1,
            }
            progress(i, &result);
            results.push(result);
        }

        (results, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{MockProvider, MockResponse};
    use crate::provider::CandidateAuthor;
    use crate::{DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS};

    fn example_record() -> CandidateRecord {
        CandidateRecord {
            doi: Some("10.1/ex".into()),
            title: "Example Paper".into(),
            authors: vec![CandidateAuthor {
                given: "A".into(),
                family: "Smith".into(),
            }],
            year: Some(2022),
            ..Default::default()
        }
    }

    fn cache() -> Arc<BibCache> {
        Arc::new(BibCache::new(DEFAULT_MAX_SIZE, DEFAULT_TTL_SECS))
    }

    #[tokio::test]
    async fn test_end_to_end_primary_hit() {
        let primary = Arc::new(MockProvider::new(
            "primary",
            MockResponse::Found(example_record()),
        ));
        let fallback = Arc::new(MockProvider::new("fallback", MockResponse::NotFound));
        let resolver = Resolver::new(
            cache(),
            primary.clone(),
            Some(fallback.clone()),
            Mode::Interactive,
        );

        let query = Query::new("Example Paper").with_year(2022);
        let resolution = resolver.resolve(&query).await.unwrap();

        let entry = resolution.entry().expect("resolved");
        assert_eq!(entry.get("doi"), Some("10.1/ex"));
        assert_eq!(entry.get("author"), Some("Smith, A"));
        assert_eq!(entry.get("year"), Some("2022"));
        assert_eq!(resolution.source, Some(Source::Primary));

        // Exactly one primary call, zero fallback calls.
        assert_eq!(primary.total_calls(), 1);
        assert_eq!(fallback.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_idempotence_second_resolve_is_cached() {
        let primary = Arc::new(MockProvider::new(
            "primary",
            MockResponse::Found(example_record()),
        ));
        let resolver = Resolver::new(cache(), primary.clone(), None, Mode::NonInteractive);

        let query = Query::new("Example Paper").with_year(2022);
        let first = resolver.resolve(&query).await.unwrap();
        let calls_after_first = primary.total_calls();
        let second = resolver.resolve(&query).await.unwrap();

        assert_eq!(primary.total_calls(), calls_after_first);
        assert_eq!(second.source, Some(Source::Cache));
        assert_eq!(
            first.entry().unwrap().to_bibtex(),
            second.entry().unwrap().to_bibtex()
        );
    }

    #[tokio::test]
    async fn test_negative_result_is_cached() {
        let primary = Arc::new(MockProvider::new("primary", MockResponse::NotFound));
        let fallback = Arc::new(MockProvider::new("fallback", MockResponse::NotFound));
        let resolver = Resolver::new(
            cache(),
            primary.clone(),
            Some(fallback.clone()),
            Mode::Interactive,
        );

        let query = Query::new("Nowhere To Be Found");
        let first = resolver.resolve(&query).await.unwrap();
        assert!(matches!(first.outcome, Outcome::Unresolved));
        assert_eq!(fallback.total_calls(), 1);

        // Second attempt is answered by the negative cache entry: no new
        // provider traffic, not even the fallback.
        let second = resolver.resolve(&query).await.unwrap();
        assert!(matches!(second.outcome, Outcome::Unresolved));
        assert_eq!(second.source, Some(Source::Cache));
        assert_eq!(primary.total_calls(), 1);
        assert_eq!(fallback.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_non_interactive_skips_fallback() {
        let primary = Arc::new(MockProvider::new("primary", MockResponse::NotFound));
        let fallback = Arc::new(MockProvider::new(
            "fallback",
            MockResponse::Found(example_record()),
        ));
        let resolver = Resolver::new(
            cache(),
            primary.clone(),
            Some(fallback.clone()),
            Mode::NonInteractive,
        );

        let resolution = resolver.resolve(&Query::new("Example Paper")).await.unwrap();
        assert!(matches!(resolution.outcome, Outcome::Unresolved));
        assert_eq!(fallback.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_runs_after_primary_misses() {
        let primary = Arc::new(MockProvider::new("primary", MockResponse::NotFound));
        let fallback = Arc::new(MockProvider::new(
            "fallback",
            MockResponse::Found(example_record()),
        ));
        let resolver = Resolver::new(
            cache(),
            primary.clone(),
            Some(fallback.clone()),
            Mode::Interactive,
        );

        let resolution = resolver.resolve(&Query::new("Example Paper")).await.unwrap();
        assert_eq!(resolution.source, Some(Source::Fallback));
        assert_eq!(primary.search_calls(), 1);
        assert_eq!(fallback.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_doi_direct_lookup_comes_first() {
        let primary = Arc::new(MockProvider::new(
            "primary",
            MockResponse::Found(example_record()),
        ));
        let resolver = Resolver::new(cache(), primary.clone(), None, Mode::NonInteractive);

        let query = Query::new("Example Paper").with_doi("10.1/ex");
        resolver.resolve(&query).await.unwrap();

        assert_eq!(primary.doi_calls(), 1);
        assert_eq!(primary.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_error_is_treated_as_no_result() {
        let primary = Arc::new(MockProvider::new(
            "primary",
            MockResponse::Error("boom".into()),
        ));
        let resolver = Resolver::new(cache(), primary.clone(), None, Mode::NonInteractive);

        let resolution = resolver.resolve(&Query::new("Example Paper")).await.unwrap();
        assert!(matches!(resolution.outcome, Outcome::Unresolved));
    }

    #[tokio::test]
    async fn test_invalid_query_is_rejected_before_io() {
        let primary = Arc::new(MockProvider::new("primary", MockResponse::NotFound));
        let resolver = Resolver::new(cache(), primary.clone(), None, Mode::NonInteractive);

        let err = resolver.resolve(&Query::new("")).await;
        assert!(matches!(err, Err(CoreError::InvalidQuery)));
        assert_eq!(primary.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_all_accounts_every_query() {
        let primary = Arc::new(MockProvider::with_sequence(
            "primary",
            vec![MockResponse::Found(example_record()), MockResponse::NotFound],
        ));
        let resolver = Resolver::new(cache(), primary, None, Mode::NonInteractive);

        let queries = vec![
            Query::new("Example Paper").with_year(2022),
            Query::new("Unfindable Paper"),
            Query::new(""), // invalid
        ];

        let mut seen = 0;
        let (results, stats) = resolver
            .resolve_all(&queries, |_, _| seen += 1)
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(seen, 3);
        assert_eq!(
            stats,
            RunStats {
                resolved: 1,
                unresolved: 1,
                errors: 1
            }
        );
    }
}
