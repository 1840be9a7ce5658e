//! Expansion scheduler
//!
//! Drives the round-based BFS over the citation graph as an explicit
//! state machine:
//!
//! `Seeding -> Scoring -> Deciding -> (Retrieving -> Scoring -> Deciding)* -> Done | Failed`
//!
//! Round 0 ingests seed-query search results only. Every later round
//! fetches citation/reference lists for its frontier, ingests and scores
//! the discoveries, then applies the stopping policy. Rounds execute
//! strictly sequentially; within a round, capability calls run under
//! bounded concurrency. Per-item failures are recorded and tolerated;
//! only whole-round infrastructure failure escalates to `Failed`, with
//! everything accumulated so far preserved.

use crate::graph::GraphStore;
use crate::model::{
    Edge, EdgeDirection, PaperKey, RawPaperRecord, RoundStatus, SeedContext,
};
use crate::normalize;
use crate::retrieval::RetrievalClient;
use crate::score::RelevanceScorer;
use citenet_common::config::EngineConfig;
use citenet_common::errors::{EngineError, ErrorClass, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Scheduler state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Seeding,
    Retrieving { round: usize },
    Scoring { round: usize },
    Deciding { round: usize },
    Done,
    Failed,
}

/// Why expansion stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxRounds,
    NoNewPapers,
    AllBelowThreshold,
    PaperCapReached,
    BudgetExhausted,
    Cancelled,
    RoundFailure,
}

/// Whether the session ran to its stopping policy or was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Complete,
    Partial,
}

/// Summary of one expansion session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub completion: Completion,
    pub stop: StopReason,
    pub rounds_run: usize,
    pub paper_count: usize,
    pub edge_count: usize,
    pub calls_used: u32,
}

/// Session-level capability-call budget
pub struct CallBudget {
    limit: Option<u32>,
    used: AtomicU32,
}

impl CallBudget {
    pub fn new(limit: Option<u32>) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    /// Charge one call, or halt expansion if the budget ran out
    pub fn try_spend(&self) -> Result<()> {
        match self.limit {
            None => {
                self.used.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Some(limit) => {
                let prev = self.used.fetch_add(1, Ordering::SeqCst);
                if prev >= limit {
                    Err(EngineError::BudgetExhausted { limit })
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst).min(self.limit.unwrap_or(u32::MAX))
    }
}

/// Per-round capability-call bookkeeping for the round-failure policy
#[derive(Debug, Default)]
struct RoundStats {
    total_ops: usize,
    failed_ops: usize,
}

impl RoundStats {
    fn majority_failed(&self) -> bool {
        self.total_ops > 0 && self.failed_ops * 2 > self.total_ops
    }
}

enum CallTally {
    Called,
    Failed,
    Skipped,
}

/// Result of fetching one frontier paper's citation links
struct PaperFetch {
    key: PaperKey,
    citing: Vec<RawPaperRecord>,
    references: Vec<RawPaperRecord>,
    total_ops: usize,
    failed_ops: usize,
}

impl PaperFetch {
    fn new(key: PaperKey) -> Self {
        Self {
            key,
            citing: Vec::new(),
            references: Vec::new(),
            total_ops: 0,
            failed_ops: 0,
        }
    }
}

/// The round-based expansion driver
pub struct ExpansionScheduler {
    config: citenet_common::config::ExpansionConfig,
    retrieval_concurrency: usize,
    scoring_concurrency: usize,
    retrieval: Arc<dyn RetrievalClient>,
    scorer: Arc<RelevanceScorer>,
    graph: Arc<GraphStore>,
    budget: CallBudget,
    cancel: CancellationToken,
    state: SchedulerState,
}

impl ExpansionScheduler {
    pub fn new(
        config: &EngineConfig,
        retrieval: Arc<dyn RetrievalClient>,
        scorer: Arc<RelevanceScorer>,
        graph: Arc<GraphStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: config.expansion.clone(),
            retrieval_concurrency: config.retrieval.max_concurrent.max(1),
            scoring_concurrency: config.scoring.max_concurrent.max(1),
            retrieval,
            scorer,
            graph,
            budget: CallBudget::new(config.expansion.api_call_budget),
            cancel,
            state: SchedulerState::Seeding,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run the session to completion, failure, or cancellation.
    ///
    /// Always returns an outcome: whatever the graph accumulated before a
    /// halt is preserved and tagged partial.
    pub async fn run(&mut self, context: &SeedContext) -> SessionOutcome {
        info!(
            queries = context.queries.len(),
            max_rounds = self.config.max_rounds,
            threshold = self.config.priority_threshold,
            "Starting expansion session"
        );

        let result = self.run_inner(context).await;

        let (completion, stop, abort_status) = match result {
            Ok((completion, stop)) => {
                self.state = SchedulerState::Done;
                (completion, stop, None)
            }
            Err(EngineError::BudgetExhausted { limit }) => {
                info!(limit, "Expansion halted: call budget exhausted");
                self.state = SchedulerState::Done;
                (
                    Completion::Partial,
                    StopReason::BudgetExhausted,
                    Some(RoundStatus::Truncated),
                )
            }
            Err(EngineError::SessionCancelled) => {
                info!("Expansion halted: session cancelled");
                self.state = SchedulerState::Failed;
                (
                    Completion::Partial,
                    StopReason::Cancelled,
                    Some(RoundStatus::Failed),
                )
            }
            Err(e) => {
                error!(error = %e, "Expansion failed");
                self.state = SchedulerState::Failed;
                (
                    Completion::Partial,
                    StopReason::RoundFailure,
                    Some(RoundStatus::Failed),
                )
            }
        };

        if let Some(status) = abort_status {
            self.graph.seal_open_rounds(status).await;
        }

        let outcome = SessionOutcome {
            completion,
            stop,
            rounds_run: self.graph.rounds().await.len(),
            paper_count: self.graph.paper_count().await,
            edge_count: self.graph.edge_count().await,
            calls_used: self.budget.used(),
        };

        info!(
            completion = ?outcome.completion,
            stop = ?outcome.stop,
            rounds = outcome.rounds_run,
            papers = outcome.paper_count,
            edges = outcome.edge_count,
            "Expansion session finished"
        );
        outcome
    }

    async fn run_inner(&mut self, context: &SeedContext) -> Result<(Completion, StopReason)> {
        // Seeding: round 0 frontier comes straight from search results
        self.state = SchedulerState::Seeding;
        let seeds = self.seed_round(context).await?;
        self.graph.begin_round(0, seeds.clone()).await;

        self.state = SchedulerState::Scoring { round: 0 };
        let mut stats = RoundStats::default();
        self.score_round(&seeds, context, &mut stats).await?;

        self.state = SchedulerState::Deciding { round: 0 };
        if stats.majority_failed() {
            self.graph
                .seal_round(0, seeds.clone(), RoundStatus::Failed)
                .await;
            return Err(EngineError::RoundFailed {
                round: 0,
                message: format!(
                    "{}/{} capability calls failed permanently",
                    stats.failed_ops, stats.total_ops
                ),
            });
        }
        self.graph
            .seal_round(0, seeds.clone(), RoundStatus::Completed)
            .await;

        if seeds.is_empty() {
            return Ok((Completion::Complete, StopReason::NoNewPapers));
        }
        let mut frontier = self.next_frontier(&seeds).await;
        if frontier.is_empty() {
            return Ok((Completion::Complete, StopReason::AllBelowThreshold));
        }

        for round in 1..=self.config.max_rounds {
            if self.cancel.is_cancelled() {
                return Err(EngineError::SessionCancelled);
            }

            info!(round, frontier = frontier.len(), "Expanding round");
            self.state = SchedulerState::Retrieving { round };
            self.graph.begin_round(round, frontier.clone()).await;

            let mut stats = RoundStats::default();
            let discovered = self.retrieve_round(round, &frontier, &mut stats).await?;

            self.state = SchedulerState::Scoring { round };
            self.score_round(&discovered, context, &mut stats).await?;
            self.classify_round(&mut stats).await?;

            self.state = SchedulerState::Deciding { round };
            if stats.majority_failed() {
                self.graph
                    .seal_round(round, discovered, RoundStatus::Failed)
                    .await;
                return Err(EngineError::RoundFailed {
                    round,
                    message: format!(
                        "{}/{} capability calls failed permanently",
                        stats.failed_ops, stats.total_ops
                    ),
                });
            }

            let capped = self.graph.paper_count().await >= self.config.max_discovered_papers;
            let status = if capped {
                RoundStatus::Truncated
            } else {
                RoundStatus::Completed
            };
            self.graph
                .seal_round(round, discovered.clone(), status)
                .await;

            info!(
                round,
                discovered = discovered.len(),
                papers = self.graph.paper_count().await,
                "Round sealed"
            );

            if discovered.is_empty() {
                return Ok((Completion::Complete, StopReason::NoNewPapers));
            }
            if capped {
                return Ok((Completion::Complete, StopReason::PaperCapReached));
            }
            frontier = self.next_frontier(&discovered).await;
            if frontier.is_empty() {
                return Ok((Completion::Complete, StopReason::AllBelowThreshold));
            }
        }

        Ok((Completion::Complete, StopReason::MaxRounds))
    }

    /// Race a capability call against session cancellation
    async fn guarded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::SessionCancelled),
            result = fut => result,
        }
    }

    async fn run_seed_query(&self, query: String) -> Result<Vec<RawPaperRecord>> {
        self.budget.try_spend()?;
        self.guarded(self.retrieval.search(&query, self.config.search_limit))
            .await
    }

    /// Search every seed query and ingest the results as round 0
    async fn seed_round(&self, context: &SeedContext) -> Result<Vec<PaperKey>> {
        let results: Vec<Result<Vec<RawPaperRecord>>> =
            futures::stream::iter(context.queries.iter().cloned())
                .map(|query| self.run_seed_query(query))
                .buffered(self.retrieval_concurrency)
                .collect()
                .await;

        let mut seeds = Vec::new();
        let mut failed = 0usize;
        let total = results.len();

        for (query, result) in context.queries.iter().zip(results) {
            match result {
                Ok(records) => {
                    for raw in records {
                        if let Some(outcome) = self.ingest_record(&raw, 0).await {
                            if outcome.is_new {
                                seeds.push(outcome.key);
                            }
                        }
                    }
                }
                Err(e) if e.class() == ErrorClass::Control => return Err(e),
                Err(e) => {
                    warn!(query = %query, error = %e, "Seed query failed");
                    failed += 1;
                }
            }
        }

        if total > 0 && failed == total {
            return Err(EngineError::RoundFailed {
                round: 0,
                message: "all seed queries failed".into(),
            });
        }

        info!(seeds = seeds.len(), "Seed round ingested");
        Ok(seeds)
    }

    /// Normalize and upsert one raw record, applying the year and
    /// citation-count ingestion filters. Returns None for filtered
    /// records and for new papers beyond the session cap.
    async fn ingest_record(
        &self,
        raw: &RawPaperRecord,
        round: usize,
    ) -> Option<crate::graph::IngestOutcome> {
        let paper = normalize::normalize(raw);

        if let Some(year_from) = self.config.year_from {
            if paper.year.is_some_and(|y| y < year_from) {
                return None;
            }
        }
        if paper.citation_count < self.config.min_citation_count {
            return None;
        }

        let is_known = self.graph.contains(&paper.key).await;
        if !is_known && self.graph.paper_count().await >= self.config.max_discovered_papers {
            return None;
        }

        Some(self.graph.upsert_paper(paper, round).await)
    }

    async fn fetch_links(&self, key: PaperKey) -> Result<PaperFetch> {
        let paper = match self.graph.paper(&key).await {
            Some(paper) => paper,
            None => return Ok(PaperFetch::new(key)),
        };

        let mut fetch = PaperFetch::new(key);

        self.budget.try_spend()?;
        fetch.total_ops += 1;
        match self
            .guarded(self.retrieval.get_citations(&paper, self.config.citation_limit))
            .await
        {
            Ok(records) => fetch.citing = records,
            Err(e) if e.class() == ErrorClass::Control => return Err(e),
            Err(e) => {
                warn!(key = %fetch.key, error = %e, "Citation fetch failed");
                fetch.failed_ops += 1;
            }
        }

        self.budget.try_spend()?;
        fetch.total_ops += 1;
        match self
            .guarded(
                self.retrieval
                    .get_references(&paper, self.config.reference_limit),
            )
            .await
        {
            Ok(records) => fetch.references = records,
            Err(e) if e.class() == ErrorClass::Control => return Err(e),
            Err(e) => {
                warn!(key = %fetch.key, error = %e, "Reference fetch failed");
                fetch.failed_ops += 1;
            }
        }

        Ok(fetch)
    }

    /// Fetch citation links for the whole frontier and ingest the
    /// discoveries. Edges are stored in citing-to-cited orientation.
    async fn retrieve_round(
        &self,
        round: usize,
        frontier: &[PaperKey],
        stats: &mut RoundStats,
    ) -> Result<Vec<PaperKey>> {
        let fetches: Vec<Result<PaperFetch>> =
            futures::stream::iter(frontier.iter().cloned())
                .map(|key| self.fetch_links(key))
                .buffered(self.retrieval_concurrency)
                .collect()
                .await;

        let mut discovered = Vec::new();
        for fetch in fetches {
            let fetch = fetch?;
            stats.total_ops += fetch.total_ops;
            stats.failed_ops += fetch.failed_ops;

            for raw in &fetch.citing {
                if let Some(outcome) = self.ingest_record(raw, round).await {
                    if outcome.is_new {
                        discovered.push(outcome.key.clone());
                    }
                    self.graph
                        .upsert_edge(&outcome.key, &fetch.key, EdgeDirection::Cites, round)
                        .await;
                }
            }
            for raw in &fetch.references {
                if let Some(outcome) = self.ingest_record(raw, round).await {
                    if outcome.is_new {
                        discovered.push(outcome.key.clone());
                    }
                    self.graph
                        .upsert_edge(&fetch.key, &outcome.key, EdgeDirection::Cites, round)
                        .await;
                }
            }
        }

        Ok(discovered)
    }

    async fn score_one(&self, key: PaperKey, context: &SeedContext) -> Result<CallTally> {
        let paper = match self.graph.paper(&key).await {
            Some(paper) => paper,
            None => return Ok(CallTally::Skipped),
        };
        if paper.scoring_attempted() {
            return Ok(CallTally::Skipped);
        }

        self.budget.try_spend()?;
        match self.guarded(self.scorer.score(&paper, context)).await {
            Ok(record) => {
                self.graph.attach_score(record).await;
                Ok(CallTally::Called)
            }
            Err(e) if e.class() == ErrorClass::Control => Err(e),
            Err(e) => {
                warn!(key = %key, error = %e, "Scoring failed permanently");
                self.graph.attach_score_failure(&key, e.to_string()).await;
                Ok(CallTally::Failed)
            }
        }
    }

    /// Score every newly ingested paper of the round
    async fn score_round(
        &self,
        keys: &[PaperKey],
        context: &SeedContext,
        stats: &mut RoundStats,
    ) -> Result<()> {
        let tallies: Vec<Result<CallTally>> = futures::stream::iter(keys.iter().cloned())
            .map(|key| self.score_one(key, context))
            .buffer_unordered(self.scoring_concurrency)
            .collect()
            .await;

        for tally in tallies {
            match tally? {
                CallTally::Called => stats.total_ops += 1,
                CallTally::Failed => {
                    stats.total_ops += 1;
                    stats.failed_ops += 1;
                }
                CallTally::Skipped => {}
            }
        }
        Ok(())
    }

    async fn classify_one(&self, edge: Edge) -> Result<CallTally> {
        let from = self.graph.paper(&edge.from).await;
        let to = self.graph.paper(&edge.to).await;
        let (from, to) = match (from, to) {
            (Some(from), Some(to)) => (from, to),
            _ => return Ok(CallTally::Skipped),
        };

        self.budget.try_spend()?;
        match self.guarded(self.scorer.classify(&edge, &from, &to)).await {
            Ok(record) => {
                self.graph
                    .attach_relationship(&edge.from, &edge.to, edge.direction, record)
                    .await;
                Ok(CallTally::Called)
            }
            Err(e) if e.class() == ErrorClass::Control => Err(e),
            Err(e) => {
                warn!(from = %edge.from, to = %edge.to, error = %e, "Classification failed");
                Ok(CallTally::Failed)
            }
        }
    }

    /// Classify edges connecting two scored papers
    async fn classify_round(&self, stats: &mut RoundStats) -> Result<()> {
        let edges = self.graph.unclassified_edges().await;
        if edges.is_empty() {
            return Ok(());
        }

        let tallies: Vec<Result<CallTally>> = futures::stream::iter(edges)
            .map(|edge| self.classify_one(edge))
            .buffer_unordered(self.scoring_concurrency)
            .collect()
            .await;

        for tally in tallies {
            match tally? {
                CallTally::Called => stats.total_ops += 1,
                CallTally::Failed => {
                    stats.total_ops += 1;
                    stats.failed_ops += 1;
                }
                CallTally::Skipped => {}
            }
        }
        Ok(())
    }

    /// Frontier for the next round: discoveries at or above the priority
    /// threshold, ordered by priority, then citation count, then
    /// discovery time for determinism. Papers below threshold stay in
    /// the graph but are not expanded further.
    async fn next_frontier(&self, discovered: &[PaperKey]) -> Vec<PaperKey> {
        let mut candidates = Vec::new();
        for key in discovered {
            if let Some(paper) = self.graph.paper(key).await {
                if paper
                    .priority()
                    .is_some_and(|p| p >= self.config.priority_threshold)
                {
                    candidates.push(paper);
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then(b.citation_count.cmp(&a.citation_count))
                .then(a.discovered_at.cmp(&b.discovered_at))
        });

        candidates.into_iter().map(|p| p.key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{S2Author, S2ExternalIds, S2Record};
    use crate::retrieval::MockRetrieval;
    use crate::score::{MockScoring, RelevanceScorer, ScoringCapability};
    use citenet_common::retry::RetryPolicy;
    use std::time::Duration;

    fn s2(doi: &str, title: &str, citations: u32) -> RawPaperRecord {
        RawPaperRecord::SemanticScholar(S2Record {
            paper_id: Some(format!("s2-{doi}")),
            title: Some(title.into()),
            authors: vec![S2Author {
                name: Some("Jane Doe".into()),
            }],
            year: Some(2021),
            abstract_text: Some("An abstract.".into()),
            citation_count: Some(citations),
            external_ids: Some(S2ExternalIds {
                doi: Some(doi.into()),
                arxiv: None,
            }),
            ..Default::default()
        })
    }

    fn key(doi: &str) -> PaperKey {
        PaperKey::new(format!("doi:{}", doi.to_lowercase()))
    }

    fn test_config(max_rounds: usize, budget: Option<u32>) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.expansion.max_rounds = max_rounds;
        config.expansion.api_call_budget = budget;
        config
    }

    fn build_scheduler(
        config: &EngineConfig,
        retrieval: MockRetrieval,
        scoring: Arc<MockScoring>,
        cancel: CancellationToken,
    ) -> (ExpansionScheduler, Arc<GraphStore>) {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        };
        let capability: Arc<dyn ScoringCapability> = scoring;
        let scorer = Arc::new(RelevanceScorer::new(
            capability,
            policy,
            config.scoring.max_concurrent,
        ));
        let graph = Arc::new(GraphStore::new());
        let scheduler = ExpansionScheduler::new(
            config,
            Arc::new(retrieval),
            scorer,
            graph.clone(),
            cancel,
        );
        (scheduler, graph)
    }

    #[tokio::test]
    async fn test_seed_expansion_scenario() {
        // 3 seeds; round 1 discovers 5 new papers plus one duplicate of
        // seed 2 (same DOI, different casing). 2 of the 5 score at or
        // above threshold, so round 2's frontier is exactly those 2.
        let retrieval = MockRetrieval::new()
            .with_search(
                "autonomous driving simulation",
                vec![
                    s2("10.1/s1", "Seed One", 300),
                    s2("10.1/s2", "Seed Two", 200),
                    s2("10.1/s3", "Seed Three", 100),
                ],
            )
            .with_citations(
                key("10.1/s1").as_str(),
                vec![
                    s2("10.1/n1", "New One", 50),
                    s2("10.1/n2", "New Two", 40),
                    s2("10.1/S2", "Seed Two", 250),
                ],
            )
            .with_citations(
                key("10.1/s2").as_str(),
                vec![s2("10.1/n3", "New Three", 30), s2("10.1/n4", "New Four", 20)],
            )
            .with_citations(key("10.1/s3").as_str(), vec![s2("10.1/n5", "New Five", 10)]);

        let scoring = Arc::new(
            MockScoring::new(3)
                .with_priority("Seed One", 5)
                .with_priority("Seed Two", 5)
                .with_priority("Seed Three", 5)
                .with_priority("New One", 4)
                .with_priority("New Two", 5),
        );

        let config = test_config(2, None);
        let (mut scheduler, graph) =
            build_scheduler(&config, retrieval, scoring.clone(), CancellationToken::new());

        let context = SeedContext::new(vec!["autonomous driving simulation".into()], "");
        let outcome = scheduler.run(&context).await;

        assert_eq!(outcome.completion, Completion::Complete);
        assert_eq!(outcome.stop, StopReason::NoNewPapers);
        assert_eq!(scheduler.state(), SchedulerState::Done);

        // 3 seeds + 5 new; the duplicate merged into seed 2
        assert_eq!(outcome.paper_count, 8);
        assert!(outcome.edge_count >= 5);
        let merged = graph.paper(&key("10.1/s2")).await.unwrap();
        assert_eq!(merged.citation_count, 250);

        let rounds = graph.rounds().await;
        assert_eq!(rounds.len(), 3);
        assert_eq!(rounds[0].discovered.len(), 3);
        assert_eq!(rounds[1].discovered.len(), 5);

        // Round 2 frontier: exactly the two high-priority discoveries,
        // highest priority first
        assert_eq!(
            rounds[2].frontier,
            vec![key("10.1/n2"), key("10.1/n1")]
        );

        // Monotonicity: every frontier paper was discovered in the
        // previous round
        for frontier_key in &rounds[2].frontier {
            assert!(rounds[1].discovered.contains(frontier_key));
        }

        // 8 papers scored once each; the duplicate triggered no re-score
        assert_eq!(scoring.score_calls(), 8);
        // All 6 edges connect scored papers and were classified
        assert_eq!(scoring.classify_calls(), 6);
    }

    #[tokio::test]
    async fn test_per_paper_retrieval_failure_tolerated() {
        let retrieval = MockRetrieval::new()
            .with_search(
                "q",
                vec![
                    s2("10.1/s1", "Seed One", 30),
                    s2("10.1/s2", "Seed Two", 20),
                    s2("10.1/s3", "Seed Three", 10),
                ],
            )
            .with_citations(key("10.1/s1").as_str(), vec![s2("10.1/n1", "New One", 5)])
            .with_citations(key("10.1/s2").as_str(), vec![s2("10.1/n2", "New Two", 5)])
            .with_link_failure(key("10.1/s3").as_str());

        let scoring = Arc::new(
            MockScoring::new(3)
                .with_priority("Seed One", 5)
                .with_priority("Seed Two", 5)
                .with_priority("Seed Three", 5),
        );

        let config = test_config(1, None);
        let (mut scheduler, graph) =
            build_scheduler(&config, retrieval, scoring, CancellationToken::new());

        let outcome = scheduler
            .run(&SeedContext::new(vec!["q".into()], ""))
            .await;

        // 2 of 6 fetch ops failed: not a majority, round completes
        assert_eq!(outcome.completion, Completion::Complete);
        assert_eq!(outcome.paper_count, 5);
        assert!(graph.contains(&key("10.1/s3")).await);

        let rounds = graph.rounds().await;
        assert_eq!(rounds[1].status, RoundStatus::Completed);
        assert_eq!(rounds[1].discovered.len(), 2);
    }

    #[tokio::test]
    async fn test_majority_failure_fails_round_preserving_partials() {
        let retrieval = MockRetrieval::new()
            .with_search("q", vec![s2("10.1/s1", "Seed One", 30)])
            .with_link_failure(key("10.1/s1").as_str());

        let scoring = Arc::new(MockScoring::new(5));
        let config = test_config(2, None);
        let (mut scheduler, graph) =
            build_scheduler(&config, retrieval, scoring, CancellationToken::new());

        let outcome = scheduler
            .run(&SeedContext::new(vec!["q".into()], ""))
            .await;

        assert_eq!(outcome.completion, Completion::Partial);
        assert_eq!(outcome.stop, StopReason::RoundFailure);
        assert_eq!(scheduler.state(), SchedulerState::Failed);

        // Round 0 results survive the failure
        assert_eq!(outcome.paper_count, 1);
        let rounds = graph.rounds().await;
        assert_eq!(rounds[1].status, RoundStatus::Failed);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_halts_gracefully() {
        let retrieval = MockRetrieval::new().with_search(
            "q",
            vec![
                s2("10.1/s1", "Seed One", 30),
                s2("10.1/s2", "Seed Two", 20),
                s2("10.1/s3", "Seed Three", 10),
            ],
        );

        let scoring = Arc::new(MockScoring::new(5));
        // 1 search + at most 2 of the 3 scoring calls fit the budget
        let config = test_config(2, Some(3));
        let (mut scheduler, graph) =
            build_scheduler(&config, retrieval, scoring, CancellationToken::new());

        let outcome = scheduler
            .run(&SeedContext::new(vec!["q".into()], ""))
            .await;

        assert_eq!(outcome.completion, Completion::Partial);
        assert_eq!(outcome.stop, StopReason::BudgetExhausted);
        assert_eq!(scheduler.state(), SchedulerState::Done);
        assert_eq!(outcome.calls_used, 3);

        // Accumulated papers are preserved and the open round is sealed
        assert_eq!(outcome.paper_count, 3);
        assert!(graph.rounds().await.iter().all(|r| r.completed_at.is_some()));
    }

    #[tokio::test]
    async fn test_terminates_at_max_rounds_on_unbounded_chain() {
        // Every paper cites a fresh one; only max_rounds stops this
        let mut retrieval =
            MockRetrieval::new().with_search("q", vec![s2("10.1/c0", "Chain 0", 100)]);
        for i in 0..10 {
            retrieval = retrieval.with_citations(
                key(&format!("10.1/c{i}")).as_str(),
                vec![s2(&format!("10.1/c{}", i + 1), &format!("Chain {}", i + 1), 100)],
            );
        }

        let scoring = Arc::new(MockScoring::new(5));
        let config = test_config(2, None);
        let (mut scheduler, graph) =
            build_scheduler(&config, retrieval, scoring, CancellationToken::new());

        let outcome = scheduler
            .run(&SeedContext::new(vec!["q".into()], ""))
            .await;

        assert_eq!(outcome.completion, Completion::Complete);
        assert_eq!(outcome.stop, StopReason::MaxRounds);
        // Seed round plus exactly two expansion rounds
        assert_eq!(graph.rounds().await.len(), 3);
        assert_eq!(outcome.paper_count, 3);
    }

    #[tokio::test]
    async fn test_all_below_threshold_stops_expansion() {
        let retrieval = MockRetrieval::new()
            .with_search("q", vec![s2("10.1/s1", "Seed One", 30)])
            .with_citations(
                key("10.1/s1").as_str(),
                vec![s2("10.1/n1", "New One", 5), s2("10.1/n2", "New Two", 5)],
            );

        // Seed expands, discoveries score below the threshold
        let scoring = Arc::new(MockScoring::new(2).with_priority("Seed One", 5));
        let config = test_config(3, None);
        let (mut scheduler, graph) =
            build_scheduler(&config, retrieval, scoring, CancellationToken::new());

        let outcome = scheduler
            .run(&SeedContext::new(vec!["q".into()], ""))
            .await;

        assert_eq!(outcome.completion, Completion::Complete);
        assert_eq!(outcome.stop, StopReason::AllBelowThreshold);
        // Low-priority papers are pruned from expansion, not deleted
        assert_eq!(outcome.paper_count, 3);
        assert_eq!(graph.rounds().await.len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_preserves_partial_results() {
        let retrieval =
            MockRetrieval::new().with_search("q", vec![s2("10.1/s1", "Seed One", 30)]);
        let scoring = Arc::new(MockScoring::new(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let config = test_config(2, None);
        let (mut scheduler, _graph) =
            build_scheduler(&config, retrieval, scoring, cancel);

        let outcome = scheduler
            .run(&SeedContext::new(vec!["q".into()], ""))
            .await;

        assert_eq!(outcome.completion, Completion::Partial);
        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert_eq!(scheduler.state(), SchedulerState::Failed);
    }

    #[tokio::test]
    async fn test_empty_seed_results_complete_with_no_papers() {
        let retrieval = MockRetrieval::new();
        let scoring = Arc::new(MockScoring::new(5));
        let config = test_config(2, None);
        let (mut scheduler, _graph) =
            build_scheduler(&config, retrieval, scoring, CancellationToken::new());

        let outcome = scheduler
            .run(&SeedContext::new(vec!["nothing".into()], ""))
            .await;

        assert_eq!(outcome.completion, Completion::Complete);
        assert_eq!(outcome.stop, StopReason::NoNewPapers);
        assert_eq!(outcome.paper_count, 0);
    }

    #[test]
    fn test_call_budget_spend() {
        let budget = CallBudget::new(Some(2));
        assert!(budget.try_spend().is_ok());
        assert!(budget.try_spend().is_ok());
        assert!(matches!(
            budget.try_spend(),
            Err(EngineError::BudgetExhausted { limit: 2 })
        ));
        assert_eq!(budget.used(), 2);

        let unlimited = CallBudget::new(None);
        for _ in 0..100 {
            assert!(unlimited.try_spend().is_ok());
        }
    }
}
