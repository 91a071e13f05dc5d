//! Mock metadata provider for testing the resolution engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{CandidateRecord, MetadataProvider, ProviderError, ProviderFuture};
use crate::Query;

/// A configurable canned response for [`MockProvider`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Simulate a confident match.
    Found(CandidateRecord),
    /// Simulate "no confident candidate".
    NotFound,
    /// Simulate a transient provider failure.
    Error(String),
}

/// A hand-rolled mock implementing [`MetadataProvider`] for tests.
///
/// Supports a fixed response or a per-call sequence (the last response
/// repeats when exhausted), and counts `search` / `search_by_doi` calls
/// separately so tests can assert on provider traffic.
pub struct MockProvider {
    name: &'static str,
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    search_calls: AtomicUsize,
    doi_calls: AtomicUsize,
}

impl MockProvider {
    /// A mock that always returns `response`.
    pub fn new(name: &'static str, response: MockResponse) -> Self {
        Self {
            name,
            responses: Mutex::new(Vec::new()),
            fallback: response,
            search_calls: AtomicUsize::new(0),
            doi_calls: AtomicUsize::new(0),
        }
    }

    /// A mock that returns responses in order, repeating the last one.
    pub fn with_sequence(name: &'static str, mut responses: Vec<MockResponse>) -> Self {
        assert!(!responses.is_empty(), "sequence must not be empty");
        // Reverse so we can pop() from the back cheaply.
        responses.reverse();
        let fallback = responses.first().cloned().unwrap();
        Self {
            name,
            responses: Mutex::new(responses),
            fallback,
            search_calls: AtomicUsize::new(0),
            doi_calls: AtomicUsize::new(0),
        }
    }

    /// How many times `search` has been called.
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// How many times `search_by_doi` has been called.
    pub fn doi_calls(&self) -> usize {
        self.doi_calls.load(Ordering::SeqCst)
    }

    /// Total provider traffic.
    pub fn total_calls(&self) -> usize {
        self.search_calls() + self.doi_calls()
    }

    fn next_response(&self) -> MockResponse {
        let mut seq = self.responses.lock().unwrap();
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }

    fn respond(&self) -> Result<Option<CandidateRecord>, ProviderError> {
        match self.next_response() {
            MockResponse::Found(record) => Ok(Some(record)),
            MockResponse::NotFound => Ok(None),
            MockResponse::Error(msg) => Err(ProviderError::Parse(msg)),
        }
    }
}

impl MetadataProvider for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn search<'a>(
        &'a self,
        _query: &'a Query,
    ) -> ProviderFuture<'a, Result<Option<CandidateRecord>, ProviderError>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.respond();
        Box::pin(async move { response })
    }

    fn search_by_doi<'a>(
        &'a self,
        _doi: &'a str,
    ) -> ProviderFuture<'a, Result<Option<CandidateRecord>, ProviderError>> {
        self.doi_calls.fetch_add(1, Ordering::SeqCst);
        let response = self.respond();
        Box::pin(async move { response })
    }
}
