//! Relevance scoring
//!
//! Provides:
//! - The `ScoringCapability` trait over the AI scoring service
//! - Content-keyed score caching with in-flight coalescing
//! - Bounded concurrency and the uniform retry policy
//!
//! Failures are never cached: a transiently failing paper can be
//! re-scored on the next request, while permanent failures are recorded
//! on the paper by the scheduler.

use crate::model::{
    Edge, Paper, RelationType, RelationshipRecord, ScoreRecord, SeedContext,
};
use async_trait::async_trait;
use chrono::Utc;
use citenet_common::errors::{Capability, EngineError, Result};
use citenet_common::retry::{with_retry, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::debug;

pub mod claude;

pub use claude::ClaudeScorer;

/// Abstract truncation bound for capability prompts
const ABSTRACT_SNIPPET_LEN: usize = 500;

/// Bounded-length summary sent to the scoring capability
#[derive(Debug, Clone)]
pub struct PaperSummary {
    pub title: String,
    pub abstract_snippet: String,
}

impl PaperSummary {
    pub fn from_paper(paper: &Paper) -> Self {
        let abstract_snippet = paper
            .abstract_text
            .as_deref()
            .unwrap_or("No abstract available")
            .chars()
            .take(ABSTRACT_SNIPPET_LEN)
            .collect();

        Self {
            title: paper.title.clone(),
            abstract_snippet,
        }
    }
}

/// Raw relevance verdict from the capability
#[derive(Debug, Clone)]
pub struct ScoredRelevance {
    pub priority: u8,
    pub rationale: String,
}

/// Raw relationship verdict from the capability
#[derive(Debug, Clone)]
pub struct ClassifiedRelation {
    pub relation: RelationType,
    pub confidence: f32,
    pub description: Option<String>,
}

/// Trait for the AI scoring service
#[async_trait]
pub trait ScoringCapability: Send + Sync {
    /// Score one paper's relevance to the seed context, 1 (irrelevant)
    /// to 5 (core)
    async fn score_paper(
        &self,
        paper: &PaperSummary,
        context: &SeedContext,
    ) -> Result<ScoredRelevance>;

    /// Classify the relationship between a citing and a cited paper
    async fn classify_relationship(
        &self,
        from: &PaperSummary,
        to: &PaperSummary,
    ) -> Result<ClassifiedRelation>;
}

/// Caching, coalescing front-end over a `ScoringCapability`
pub struct RelevanceScorer {
    capability: Arc<dyn ScoringCapability>,
    cache: RwLock<HashMap<String, ScoreRecord>>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    semaphore: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl RelevanceScorer {
    pub fn new(
        capability: Arc<dyn ScoringCapability>,
        policy: RetryPolicy,
        max_concurrent: usize,
    ) -> Self {
        Self {
            capability,
            cache: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            policy,
        }
    }

    /// Score a paper against the seed context.
    ///
    /// Cache hits return without a capability call. Concurrent requests
    /// for the same cache-key coalesce onto one in-flight call; the rest
    /// await its result.
    pub async fn score(&self, paper: &Paper, context: &SeedContext) -> Result<ScoreRecord> {
        let cache_key = ScoreRecord::cache_key_for(&paper.key, context);

        if let Some(hit) = self.cache.read().await.get(&cache_key) {
            metrics::counter!("citenet_score_cache_hits_total").increment(1);
            return Ok(hit.clone());
        }

        // One in-flight call per cache-key; later arrivals queue on the
        // key guard and find the cache populated
        let guard = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(cache_key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _held = guard.lock().await;

        if let Some(hit) = self.cache.read().await.get(&cache_key) {
            metrics::counter!("citenet_score_cache_hits_total").increment(1);
            return Ok(hit.clone());
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("scorer semaphore never closes");

        let summary = PaperSummary::from_paper(paper);
        let verdict = match with_retry(&self.policy, "scoring.score_paper", || {
            self.capability.score_paper(&summary, context)
        })
        .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                self.inflight.lock().await.remove(&cache_key);
                return Err(e);
            }
        };

        let record = ScoreRecord {
            paper_key: paper.key.clone(),
            priority: verdict.priority.clamp(1, 5),
            rationale: verdict.rationale,
            seed_context: context.keywords(),
            cache_key: cache_key.clone(),
            scored_at: Utc::now(),
        };

        self.cache
            .write()
            .await
            .insert(cache_key.clone(), record.clone());
        self.inflight.lock().await.remove(&cache_key);

        debug!(key = %record.paper_key, priority = record.priority, "Paper scored");
        Ok(record)
    }

    /// Classify the relationship carried by an edge whose endpoints are
    /// both scored
    pub async fn classify(
        &self,
        edge: &Edge,
        from: &Paper,
        to: &Paper,
    ) -> Result<RelationshipRecord> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("scorer semaphore never closes");

        let from_summary = PaperSummary::from_paper(from);
        let to_summary = PaperSummary::from_paper(to);
        let verdict = with_retry(&self.policy, "scoring.classify_relationship", || {
            self.capability
                .classify_relationship(&from_summary, &to_summary)
        })
        .await?;

        Ok(RelationshipRecord {
            from: edge.from.clone(),
            to: edge.to.clone(),
            relation: verdict.relation,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            description: verdict.description,
            classified_at: Utc::now(),
        })
    }

    /// Pre-populate the cache, e.g. from a restored session snapshot
    pub async fn seed_cache(&self, records: impl IntoIterator<Item = ScoreRecord>) {
        let mut cache = self.cache.write().await;
        for record in records {
            cache.entry(record.cache_key.clone()).or_insert(record);
        }
    }
}

/// Scripted scoring capability for testing
pub struct MockScoring {
    default_priority: u8,
    priorities: HashMap<String, u8>,
    transient_failures: Mutex<HashMap<String, u32>>,
    permanent_failures: Vec<String>,
    score_calls: std::sync::atomic::AtomicUsize,
    classify_calls: std::sync::atomic::AtomicUsize,
}

impl MockScoring {
    pub fn new(default_priority: u8) -> Self {
        Self {
            default_priority,
            priorities: HashMap::new(),
            transient_failures: Mutex::new(HashMap::new()),
            permanent_failures: Vec::new(),
            score_calls: std::sync::atomic::AtomicUsize::new(0),
            classify_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Fix the priority returned for an exact title
    pub fn with_priority(mut self, title: &str, priority: u8) -> Self {
        self.priorities.insert(title.to_string(), priority);
        self
    }

    /// Fail the first `count` score calls for a title with a rate limit
    pub fn with_transient_failures(self, title: &str, count: u32) -> Self {
        self.transient_failures
            .try_lock()
            .expect("unused at build time")
            .insert(title.to_string(), count);
        self
    }

    /// Permanently fail score calls for a title
    pub fn with_permanent_failure(mut self, title: &str) -> Self {
        self.permanent_failures.push(title.to_string());
        self
    }

    pub fn score_calls(&self) -> usize {
        self.score_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringCapability for MockScoring {
    async fn score_paper(
        &self,
        paper: &PaperSummary,
        _context: &SeedContext,
    ) -> Result<ScoredRelevance> {
        self.score_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if self.permanent_failures.contains(&paper.title) {
            return Err(EngineError::Rejected {
                capability: Capability::Scoring,
                status: 400,
                message: format!("scripted permanent failure for '{}'", paper.title),
            });
        }

        {
            let mut failures = self.transient_failures.lock().await;
            if let Some(remaining) = failures.get_mut(&paper.title) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(EngineError::RateLimited {
                        capability: Capability::Scoring,
                        retry_after_secs: None,
                    });
                }
            }
        }

        let priority = self
            .priorities
            .get(&paper.title)
            .copied()
            .unwrap_or(self.default_priority);

        Ok(ScoredRelevance {
            priority,
            rationale: format!("mock verdict for '{}'", paper.title),
        })
    }

    async fn classify_relationship(
        &self,
        _from: &PaperSummary,
        _to: &PaperSummary,
    ) -> Result<ClassifiedRelation> {
        self.classify_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(ClassifiedRelation {
            relation: RelationType::BuildsOn,
            confidence: 0.8,
            description: None,
        })
    }
}
