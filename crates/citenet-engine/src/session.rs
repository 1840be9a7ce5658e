//! Research session wiring and persistence hooks
//!
//! A `ResearchSession` owns one graph store and one scheduler, wires the
//! capability adapters together from configuration, and exposes the
//! persistence contract (`SessionStore`) without defining any storage
//! schema.

use crate::assemble::{export_view, ExportView};
use crate::expand::{ExpansionScheduler, SessionOutcome};
use crate::graph::{GraphSnapshot, GraphStore};
use crate::model::{RelevanceOutcome, SeedContext};
use crate::retrieval::RetrievalClient;
use crate::score::{RelevanceScorer, ScoringCapability};
use async_trait::async_trait;
use citenet_common::config::EngineConfig;
use citenet_common::errors::{EngineError, Result};
use citenet_common::retry::RetryPolicy;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Persistence boundary owned by an external collaborator
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, id: Uuid) -> Result<Option<GraphSnapshot>>;
    async fn save_session(&self, id: Uuid, snapshot: &GraphSnapshot) -> Result<()>;
}

/// In-memory session store, for tests and single-process use
pub struct MemorySessionStore {
    sessions: tokio::sync::Mutex<std::collections::HashMap<Uuid, GraphSnapshot>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, id: Uuid) -> Result<Option<GraphSnapshot>> {
        Ok(self.sessions.lock().await.get(&id).cloned())
    }

    async fn save_session(&self, id: Uuid, snapshot: &GraphSnapshot) -> Result<()> {
        self.sessions.lock().await.insert(id, snapshot.clone());
        Ok(())
    }
}

/// One citation-network expansion session
pub struct ResearchSession {
    id: Uuid,
    config: EngineConfig,
    graph: Arc<GraphStore>,
    scorer: Arc<RelevanceScorer>,
    scheduler: ExpansionScheduler,
    cancel: CancellationToken,
}

impl ResearchSession {
    /// Create a fresh session over the given capabilities
    pub fn new(
        config: EngineConfig,
        retrieval: Arc<dyn RetrievalClient>,
        scoring: Arc<dyn ScoringCapability>,
    ) -> Self {
        Self::with_graph(config, retrieval, scoring, Arc::new(GraphStore::new()))
    }

    /// Resume a persisted session: the graph is rebuilt from the
    /// snapshot and cached scores are replayed into the scorer so
    /// unchanged papers are not re-scored.
    pub async fn restore(
        config: EngineConfig,
        retrieval: Arc<dyn RetrievalClient>,
        scoring: Arc<dyn ScoringCapability>,
        id: Uuid,
        store: &dyn SessionStore,
    ) -> Result<Self> {
        let snapshot = store
            .load_session(id)
            .await?
            .ok_or_else(|| EngineError::Persistence {
                message: format!("session {} not found", id),
            })?;

        let cached: Vec<_> = snapshot
            .papers
            .iter()
            .filter_map(|p| match &p.relevance {
                Some(RelevanceOutcome::Scored(score)) => Some(score.clone()),
                _ => None,
            })
            .collect();

        let graph = Arc::new(GraphStore::from_snapshot(snapshot).await);
        let mut session = Self::with_graph(config, retrieval, scoring, graph);
        session.id = id;
        info!(session = %id, cached_scores = cached.len(), "Session restored");
        session.scorer.seed_cache(cached).await;
        Ok(session)
    }

    fn with_graph(
        config: EngineConfig,
        retrieval: Arc<dyn RetrievalClient>,
        scoring: Arc<dyn ScoringCapability>,
        graph: Arc<GraphStore>,
    ) -> Self {
        citenet_common::metrics::register_metrics();

        let cancel = CancellationToken::new();
        let policy = RetryPolicy::from(&config.retry);
        let scorer = Arc::new(RelevanceScorer::new(
            scoring,
            policy,
            config.scoring.max_concurrent,
        ));

        let scheduler = ExpansionScheduler::new(
            &config,
            retrieval,
            scorer.clone(),
            graph.clone(),
            cancel.clone(),
        );

        Self {
            id: Uuid::new_v4(),
            config,
            graph,
            scorer,
            scheduler,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Token observed by every in-flight capability call
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation; in-flight calls abort at their
    /// next suspension point and partial results are preserved
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the expansion to completion, failure, or cancellation
    pub async fn run(&mut self, context: &SeedContext) -> SessionOutcome {
        let context = context
            .clone()
            .with_version(self.config.scoring.context_version.clone());
        self.scheduler.run(&context).await
    }

    /// Read-only snapshot of everything accumulated so far
    pub async fn snapshot(&self) -> GraphSnapshot {
        self.graph.snapshot().await
    }

    /// Filtered, sorted export for downstream consumers
    pub async fn export(&self, min_priority: u8) -> ExportView {
        export_view(&self.graph.snapshot().await, min_priority)
    }

    /// Export at the configured priority threshold
    pub async fn export_default(&self) -> ExportView {
        self.export(self.config.expansion.priority_threshold).await
    }

    /// Persist the current graph through the session store
    pub async fn save(&self, store: &dyn SessionStore) -> Result<()> {
        let snapshot = self.graph.snapshot().await;
        store.save_session(self.id, &snapshot).await?;
        info!(session = %self.id, papers = snapshot.papers.len(), "Session saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawPaperRecord, S2Author, S2ExternalIds, S2Record};
    use crate::retrieval::MockRetrieval;
    use crate::score::MockScoring;

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

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.expansion.max_rounds = 1;
        config
    }

    #[tokio::test]
    async fn test_run_export_save_restore() {
        let retrieval = Arc::new(
            MockRetrieval::new()
                .with_search("q", vec![s2("10.1/s1", "Seed One", 30)])
                .with_citations("doi:10.1/s1", vec![s2("10.1/n1", "New One", 5)]),
        );
        let scoring = Arc::new(MockScoring::new(5));

        let mut session =
            ResearchSession::new(test_config(), retrieval.clone(), scoring.clone());
        let outcome = session
            .run(&SeedContext::new(vec!["q".into()], "autonomy"))
            .await;
        assert_eq!(outcome.paper_count, 2);

        let view = session.export_default().await;
        assert_eq!(view.papers.len(), 2);

        let store = MemorySessionStore::new();
        session.save(&store).await.unwrap();

        let restored = ResearchSession::restore(
            test_config(),
            retrieval,
            scoring,
            session.id(),
            &store,
        )
        .await
        .unwrap();
        assert_eq!(restored.id(), session.id());
        let snapshot = restored.snapshot().await;
        assert_eq!(snapshot.papers.len(), 2);
        assert_eq!(snapshot.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_unknown_session_errors() {
        let store = MemorySessionStore::new();
        let result = ResearchSession::restore(
            test_config(),
            Arc::new(MockRetrieval::new()),
            Arc::new(MockScoring::new(3)),
            Uuid::new_v4(),
            &store,
        )
        .await;
        assert!(result.is_err());
    }
}
