//! Retrieval capability abstraction
//!
//! Provides a unified interface over academic search backends:
//! - Semantic Scholar (search + citation/reference lists)
//! - CrossRef (search only, cross-disciplinary coverage)
//!
//! Backends surface rate-limit signals distinguishably from other
//! failures so the shared retry helper can back off correctly.

use crate::model::{ExternalId, Paper, RawPaperRecord};
use async_trait::async_trait;
use citenet_common::errors::Result;
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;

pub mod crossref;
pub mod semantic_scholar;

pub use crossref::CrossrefClient;
pub use semantic_scholar::SemanticScholarClient;

/// Token-bucket limiter shared by a client's outbound requests
pub(crate) type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

pub(crate) fn make_limiter(requests_per_second: u32) -> DirectLimiter {
    let rate = NonZeroU32::new(requests_per_second.max(1)).expect("nonzero rate");
    RateLimiter::direct(Quota::per_second(rate))
}

/// Trait for academic paper retrieval backends
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Search papers by free-text query
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawPaperRecord>>;

    /// Papers that cite the given paper
    async fn get_citations(&self, paper: &Paper, limit: usize) -> Result<Vec<RawPaperRecord>>;

    /// Papers the given paper cites
    async fn get_references(&self, paper: &Paper, limit: usize) -> Result<Vec<RawPaperRecord>>;
}

/// Best backend identifier for citation lookups, in Semantic Scholar
/// lookup syntax: native id, then DOI, then arXiv id.
pub fn s2_lookup_id(paper: &Paper) -> Option<String> {
    let mut doi = None;
    let mut arxiv = None;
    for id in &paper.external_ids {
        match id {
            ExternalId::SemanticScholar(v) => return Some(v.clone()),
            ExternalId::Doi(v) => doi = Some(v.clone()),
            ExternalId::Arxiv(v) => arxiv = Some(v.clone()),
        }
    }
    doi.map(|d| format!("DOI:{}", d))
        .or_else(|| arxiv.map(|a| format!("ARXIV:{}", a)))
}

/// Scripted retrieval backend for testing
pub struct MockRetrieval {
    search_results: std::collections::HashMap<String, Vec<RawPaperRecord>>,
    citations: std::collections::HashMap<String, Vec<RawPaperRecord>>,
    references: std::collections::HashMap<String, Vec<RawPaperRecord>>,
    link_failures: Vec<String>,
    search_calls: std::sync::atomic::AtomicUsize,
    link_calls: std::sync::atomic::AtomicUsize,
}

impl MockRetrieval {
    pub fn new() -> Self {
        Self {
            search_results: std::collections::HashMap::new(),
            citations: std::collections::HashMap::new(),
            references: std::collections::HashMap::new(),
            link_failures: Vec::new(),
            search_calls: std::sync::atomic::AtomicUsize::new(0),
            link_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Script the records returned for an exact query
    pub fn with_search(mut self, query: &str, records: Vec<RawPaperRecord>) -> Self {
        self.search_results.insert(query.to_string(), records);
        self
    }

    /// Script the citing papers returned for a canonical paper key
    pub fn with_citations(mut self, paper_key: &str, records: Vec<RawPaperRecord>) -> Self {
        self.citations.insert(paper_key.to_string(), records);
        self
    }

    /// Script the references returned for a canonical paper key
    pub fn with_references(mut self, paper_key: &str, records: Vec<RawPaperRecord>) -> Self {
        self.references.insert(paper_key.to_string(), records);
        self
    }

    /// Permanently fail citation/reference lookups for a paper
    pub fn with_link_failure(mut self, paper_key: &str) -> Self {
        self.link_failures.push(paper_key.to_string());
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn link_calls(&self) -> usize {
        self.link_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn scripted(
        map: &std::collections::HashMap<String, Vec<RawPaperRecord>>,
        key: &str,
        limit: usize,
    ) -> Vec<RawPaperRecord> {
        let mut records = map.get(key).cloned().unwrap_or_default();
        records.truncate(limit);
        records
    }
}

impl Default for MockRetrieval {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RetrievalClient for MockRetrieval {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawPaperRecord>> {
        self.search_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Self::scripted(&self.search_results, query, limit))
    }

    async fn get_citations(&self, paper: &Paper, limit: usize) -> Result<Vec<RawPaperRecord>> {
        self.link_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.link_failures.iter().any(|k| k == paper.key.as_str()) {
            return Err(citenet_common::errors::EngineError::Rejected {
                capability: citenet_common::errors::Capability::Retrieval,
                status: 404,
                message: format!("scripted failure for {}", paper.key),
            });
        }
        Ok(Self::scripted(&self.citations, paper.key.as_str(), limit))
    }

    async fn get_references(&self, paper: &Paper, limit: usize) -> Result<Vec<RawPaperRecord>> {
        self.link_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.link_failures.iter().any(|k| k == paper.key.as_str()) {
            return Err(citenet_common::errors::EngineError::Rejected {
                capability: citenet_common::errors::Capability::Retrieval,
                status: 404,
                message: format!("scripted failure for {}", paper.key),
            });
        }
        Ok(Self::scripted(&self.references, paper.key.as_str(), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PaperKey, S2Author, S2Record};
    use crate::normalize::normalize;
    use std::collections::BTreeSet;

    fn paper_with_ids(ids: BTreeSet<ExternalId>) -> Paper {
        let mut paper = normalize(&RawPaperRecord::SemanticScholar(S2Record {
            paper_id: None,
            title: Some("T".into()),
            authors: vec![S2Author {
                name: Some("A B".into()),
            }],
            year: Some(2020),
            ..Default::default()
        }));
        paper.key = PaperKey::new("test");
        paper.external_ids = ids;
        paper
    }

    #[test]
    fn test_lookup_id_prefers_native_id() {
        let mut ids = BTreeSet::new();
        ids.insert(ExternalId::Doi("10.1/a".into()));
        ids.insert(ExternalId::SemanticScholar("649def34".into()));
        ids.insert(ExternalId::Arxiv("1604.07316".into()));
        assert_eq!(
            s2_lookup_id(&paper_with_ids(ids)).as_deref(),
            Some("649def34")
        );
    }

    #[test]
    fn test_lookup_id_falls_back_to_doi_then_arxiv() {
        let mut ids = BTreeSet::new();
        ids.insert(ExternalId::Doi("10.1/a".into()));
        ids.insert(ExternalId::Arxiv("1604.07316".into()));
        assert_eq!(
            s2_lookup_id(&paper_with_ids(ids)).as_deref(),
            Some("DOI:10.1/a")
        );

        let mut ids = BTreeSet::new();
        ids.insert(ExternalId::Arxiv("1604.07316".into()));
        assert_eq!(
            s2_lookup_id(&paper_with_ids(ids)).as_deref(),
            Some("ARXIV:1604.07316")
        );

        assert_eq!(s2_lookup_id(&paper_with_ids(BTreeSet::new())), None);
    }
}
