//! In-memory citation graph store
//!
//! Provides:
//! - Idempotent paper/edge upserts with merge-on-duplicate
//! - Score and relationship attachment
//! - O(1) key lookup and O(degree) neighbor traversal
//! - Read-only snapshots for consumers and persistence hooks
//!
//! The store is exclusively owned by one session. Papers are sharded
//! across key-scoped locks so concurrent callers touching unrelated
//! papers do not serialize on a single global lock.

use crate::model::{
    Edge, EdgeDirection, ExpansionRound, Paper, PaperKey, RelationshipRecord, RelevanceOutcome,
    RoundStatus, ScoreRecord,
};
use crate::normalize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use tokio::sync::RwLock;
use tracing::debug;

const SHARD_COUNT: usize = 16;

/// Result of a paper upsert
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub key: PaperKey,
    pub is_new: bool,
}

/// Result of an edge upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeInsert {
    Inserted,
    Duplicate,
    SelfLoopRejected,
}

type EdgeId = (PaperKey, PaperKey, EdgeDirection);

#[derive(Default)]
struct EdgeTable {
    edges: HashMap<EdgeId, Edge>,
    adjacency: HashMap<PaperKey, HashMap<EdgeDirection, BTreeSet<PaperKey>>>,
}

/// The session-owned citation graph
pub struct GraphStore {
    shards: Vec<RwLock<HashMap<PaperKey, Paper>>>,
    edges: RwLock<EdgeTable>,
    scores: RwLock<HashMap<String, ScoreRecord>>,
    rounds: RwLock<Vec<ExpansionRound>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            edges: RwLock::new(EdgeTable::default()),
            scores: RwLock::new(HashMap::new()),
            rounds: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild a store from a persisted snapshot
    pub async fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let store = Self::new();
        for paper in snapshot.papers {
            if let Some(RelevanceOutcome::Scored(score)) = &paper.relevance {
                store
                    .scores
                    .write()
                    .await
                    .insert(score.cache_key.clone(), score.clone());
            }
            let shard = store.shard(&paper.key);
            shard.write().await.insert(paper.key.clone(), paper);
        }
        {
            let mut table = store.edges.write().await;
            for edge in snapshot.edges {
                table.link(&edge.from, &edge.to, edge.direction);
                table
                    .edges
                    .insert((edge.from.clone(), edge.to.clone(), edge.direction), edge);
            }
        }
        *store.rounds.write().await = snapshot.rounds;
        store
    }

    fn shard(&self, key: &PaperKey) -> &RwLock<HashMap<PaperKey, Paper>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Insert a paper or merge it into an existing node with the same key.
    ///
    /// Idempotent: re-applying the same paper is a no-op beyond timestamp
    /// bookkeeping. `round` stamps first discovery only.
    pub async fn upsert_paper(&self, mut paper: Paper, round: usize) -> IngestOutcome {
        let key = paper.key.clone();
        let mut shard = self.shard(&key).write().await;

        match shard.get_mut(&key) {
            Some(existing) => {
                let changed = normalize::merge(existing, paper);
                if changed {
                    metrics::counter!("citenet_papers_merged_total").increment(1);
                    debug!(key = %key, "Merged duplicate paper");
                }
                IngestOutcome { key, is_new: false }
            }
            None => {
                paper.discovered_in_round = round;
                shard.insert(key.clone(), paper);
                metrics::counter!("citenet_papers_ingested_total").increment(1);
                IngestOutcome { key, is_new: true }
            }
        }
    }

    /// Insert a citation edge. Self-edges are rejected; duplicates on
    /// (from, to, direction) are no-ops.
    pub async fn upsert_edge(
        &self,
        from: &PaperKey,
        to: &PaperKey,
        direction: EdgeDirection,
        round: usize,
    ) -> EdgeInsert {
        if from == to {
            debug!(key = %from, "Rejected self-edge");
            return EdgeInsert::SelfLoopRejected;
        }

        let id = (from.clone(), to.clone(), direction);
        let mut table = self.edges.write().await;
        if table.edges.contains_key(&id) {
            return EdgeInsert::Duplicate;
        }

        table.link(from, to, direction);
        table.edges.insert(
            id,
            Edge {
                from: from.clone(),
                to: to.clone(),
                direction,
                discovered_in_round: round,
                relationship: None,
            },
        );
        metrics::counter!("citenet_edges_inserted_total").increment(1);
        EdgeInsert::Inserted
    }

    /// Attach a score record to its paper. At most one record per
    /// cache-key is kept; re-attachment is a no-op.
    pub async fn attach_score(&self, record: ScoreRecord) -> bool {
        let inserted = {
            let mut scores = self.scores.write().await;
            if scores.contains_key(&record.cache_key) {
                false
            } else {
                scores.insert(record.cache_key.clone(), record.clone());
                true
            }
        };

        let mut shard = self.shard(&record.paper_key).write().await;
        if let Some(paper) = shard.get_mut(&record.paper_key) {
            paper.relevance = Some(RelevanceOutcome::Scored(record));
        }
        inserted
    }

    /// Mark a paper as permanently unscorable for this session. Does not
    /// overwrite an existing successful score.
    pub async fn attach_score_failure(&self, key: &PaperKey, reason: impl Into<String>) {
        let mut shard = self.shard(key).write().await;
        if let Some(paper) = shard.get_mut(key) {
            if paper.priority().is_none() {
                paper.relevance = Some(RelevanceOutcome::Failed {
                    reason: reason.into(),
                    failed_at: Utc::now(),
                });
            }
        }
    }

    /// Attach a relationship classification to an existing edge
    pub async fn attach_relationship(
        &self,
        from: &PaperKey,
        to: &PaperKey,
        direction: EdgeDirection,
        record: RelationshipRecord,
    ) -> bool {
        let mut table = self.edges.write().await;
        match table
            .edges
            .get_mut(&(from.clone(), to.clone(), direction))
        {
            Some(edge) => {
                edge.relationship = Some(record);
                true
            }
            None => false,
        }
    }

    pub async fn paper(&self, key: &PaperKey) -> Option<Paper> {
        self.shard(key).read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &PaperKey) -> bool {
        self.shard(key).read().await.contains_key(key)
    }

    pub async fn paper_count(&self) -> usize {
        let mut count = 0;
        for shard in &self.shards {
            count += shard.read().await.len();
        }
        count
    }

    pub async fn edge_count(&self) -> usize {
        self.edges.read().await.edges.len()
    }

    /// Keys adjacent to `key` in the given direction
    pub async fn neighbors(&self, key: &PaperKey, direction: EdgeDirection) -> BTreeSet<PaperKey> {
        self.edges
            .read()
            .await
            .adjacency
            .get(key)
            .and_then(|by_dir| by_dir.get(&direction))
            .cloned()
            .unwrap_or_default()
    }

    /// Edges whose endpoints are both scored but which carry no
    /// relationship classification yet
    pub async fn unclassified_edges(&self) -> Vec<Edge> {
        let candidates: Vec<Edge> = {
            let table = self.edges.read().await;
            table
                .edges
                .values()
                .filter(|e| e.relationship.is_none())
                .cloned()
                .collect()
        };

        let mut out = Vec::new();
        for edge in candidates {
            let from_scored = self
                .paper(&edge.from)
                .await
                .is_some_and(|p| p.priority().is_some());
            let to_scored = self
                .paper(&edge.to)
                .await
                .is_some_and(|p| p.priority().is_some());
            if from_scored && to_scored {
                out.push(edge);
            }
        }
        out
    }

    /// Open a new expansion round
    pub async fn begin_round(&self, number: usize, frontier: Vec<PaperKey>) {
        self.rounds.write().await.push(ExpansionRound {
            number,
            frontier,
            discovered: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            status: RoundStatus::Running,
        });
    }

    /// Seal a round; sealed rounds are never mutated again
    pub async fn seal_round(&self, number: usize, discovered: Vec<PaperKey>, status: RoundStatus) {
        let mut rounds = self.rounds.write().await;
        if let Some(round) = rounds.iter_mut().find(|r| r.number == number) {
            if round.completed_at.is_none() {
                round.discovered = discovered;
                round.completed_at = Some(Utc::now());
                round.status = status;
                metrics::counter!("citenet_rounds_completed_total").increment(1);
            }
        }
    }

    /// Seal any round left running, e.g. after cancellation or a
    /// whole-round failure. Already-sealed rounds are untouched.
    pub async fn seal_open_rounds(&self, status: RoundStatus) {
        let mut rounds = self.rounds.write().await;
        for round in rounds.iter_mut().filter(|r| r.completed_at.is_none()) {
            round.completed_at = Some(Utc::now());
            round.status = status;
        }
    }

    pub async fn rounds(&self) -> Vec<ExpansionRound> {
        self.rounds.read().await.clone()
    }

    /// Produce a read-only snapshot for consumers and persistence.
    ///
    /// Papers and edges come out in stable key order.
    pub async fn snapshot(&self) -> GraphSnapshot {
        let mut papers = Vec::new();
        for shard in &self.shards {
            papers.extend(shard.read().await.values().cloned());
        }
        papers.sort_by(|a, b| a.key.cmp(&b.key));

        let mut edges: Vec<Edge> = self.edges.read().await.edges.values().cloned().collect();
        edges.sort_by(|a, b| {
            (&a.from, &a.to, a.direction).cmp(&(&b.from, &b.to, b.direction))
        });

        GraphSnapshot {
            papers,
            edges,
            rounds: self.rounds.read().await.clone(),
            created_at: Utc::now(),
        }
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeTable {
    /// Record adjacency in both orientations so neighbor lookups are
    /// O(degree) regardless of which endpoint the edge was stored under
    fn link(&mut self, from: &PaperKey, to: &PaperKey, direction: EdgeDirection) {
        self.adjacency
            .entry(from.clone())
            .or_default()
            .entry(direction)
            .or_default()
            .insert(to.clone());
        self.adjacency
            .entry(to.clone())
            .or_default()
            .entry(direction.reversed())
            .or_default()
            .insert(from.clone());
    }
}

/// Serializable read-only view of the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub papers: Vec<Paper>,
    pub edges: Vec<Edge>,
    pub rounds: Vec<ExpansionRound>,
    pub created_at: DateTime<Utc>,
}

impl GraphSnapshot {
    pub fn paper(&self, key: &PaperKey) -> Option<&Paper> {
        self.papers.iter().find(|p| &p.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawPaperRecord, S2Author, S2ExternalIds, S2Record};
    use crate::normalize::normalize;

    fn paper(doi: &str, title: &str, citations: u32) -> Paper {
        normalize(&RawPaperRecord::SemanticScholar(S2Record {
            paper_id: Some(format!("s2-{doi}")),
            title: Some(title.into()),
            authors: vec![S2Author {
                name: Some("Jane Doe".into()),
            }],
            year: Some(2020),
            citation_count: Some(citations),
            external_ids: Some(S2ExternalIds {
                doi: Some(doi.into()),
                arxiv: None,
            }),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_double_ingest_is_idempotent() {
        let store = GraphStore::new();
        let p = paper("10.1/a", "Paper A", 10);

        let first = store.upsert_paper(p.clone(), 0).await;
        let second = store.upsert_paper(p, 0).await;

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.key, second.key);
        assert_eq!(store.paper_count().await, 1);
    }

    #[tokio::test]
    async fn test_merge_on_duplicate_key() {
        let store = GraphStore::new();
        store.upsert_paper(paper("10.1/a", "Paper A", 10), 0).await;

        let mut richer = paper("10.1/A", "Paper A", 99);
        richer.abstract_text = Some("Full abstract".into());
        let outcome = store.upsert_paper(richer, 1).await;

        assert!(!outcome.is_new);
        let stored = store.paper(&outcome.key).await.unwrap();
        assert_eq!(stored.citation_count, 99);
        assert_eq!(stored.abstract_text.as_deref(), Some("Full abstract"));
        // First-discovery bookkeeping survives the merge
        assert_eq!(stored.discovered_in_round, 0);
    }

    #[tokio::test]
    async fn test_self_edge_rejected() {
        let store = GraphStore::new();
        let key = PaperKey::new("doi:10.1/a");
        let result = store
            .upsert_edge(&key, &key, EdgeDirection::Cites, 1)
            .await;
        assert_eq!(result, EdgeInsert::SelfLoopRejected);
        assert_eq!(store.edge_count().await, 0);
    }

    #[tokio::test]
    async fn test_edge_dedup_and_neighbors() {
        let store = GraphStore::new();
        let a = PaperKey::new("doi:10.1/a");
        let b = PaperKey::new("doi:10.1/b");

        assert_eq!(
            store.upsert_edge(&a, &b, EdgeDirection::Cites, 1).await,
            EdgeInsert::Inserted
        );
        assert_eq!(
            store.upsert_edge(&a, &b, EdgeDirection::Cites, 2).await,
            EdgeInsert::Duplicate
        );
        assert_eq!(store.edge_count().await, 1);

        let cited_by_a = store.neighbors(&a, EdgeDirection::Cites).await;
        assert!(cited_by_a.contains(&b));
        let citing_b = store.neighbors(&b, EdgeDirection::IsCitedBy).await;
        assert!(citing_b.contains(&a));
    }

    #[tokio::test]
    async fn test_attach_score_once_per_cache_key() {
        let store = GraphStore::new();
        let p = paper("10.1/a", "Paper A", 10);
        let key = store.upsert_paper(p, 0).await.key;

        let ctx = crate::model::SeedContext::new(vec!["driving".into()], "");
        let record = ScoreRecord {
            paper_key: key.clone(),
            priority: 4,
            rationale: "relevant".into(),
            seed_context: ctx.keywords(),
            cache_key: ScoreRecord::cache_key_for(&key, &ctx),
            scored_at: Utc::now(),
        };

        assert!(store.attach_score(record.clone()).await);
        assert!(!store.attach_score(record).await);
        assert_eq!(store.paper(&key).await.unwrap().priority(), Some(4));
    }

    #[tokio::test]
    async fn test_score_failure_does_not_clobber_score() {
        let store = GraphStore::new();
        let p = paper("10.1/a", "Paper A", 10);
        let key = store.upsert_paper(p, 0).await.key;

        let ctx = crate::model::SeedContext::new(vec!["driving".into()], "");
        store
            .attach_score(ScoreRecord {
                paper_key: key.clone(),
                priority: 5,
                rationale: "core".into(),
                seed_context: ctx.keywords(),
                cache_key: ScoreRecord::cache_key_for(&key, &ctx),
                scored_at: Utc::now(),
            })
            .await;

        store.attach_score_failure(&key, "late failure").await;
        assert_eq!(store.paper(&key).await.unwrap().priority(), Some(5));
    }

    #[tokio::test]
    async fn test_snapshot_restore_roundtrip() {
        let store = GraphStore::new();
        let a = store.upsert_paper(paper("10.1/a", "A", 1), 0).await.key;
        let b = store.upsert_paper(paper("10.1/b", "B", 2), 0).await.key;
        store.upsert_edge(&a, &b, EdgeDirection::Cites, 1).await;
        store.begin_round(0, vec![]).await;
        store
            .seal_round(0, vec![a.clone(), b.clone()], RoundStatus::Completed)
            .await;

        let snapshot = store.snapshot().await;
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: GraphSnapshot = serde_json::from_str(&json).unwrap();

        let restored = GraphStore::from_snapshot(parsed).await;
        assert_eq!(restored.paper_count().await, 2);
        assert_eq!(restored.edge_count().await, 1);
        assert_eq!(restored.rounds().await.len(), 1);
        assert!(restored
            .neighbors(&a, EdgeDirection::Cites)
            .await
            .contains(&b));
    }

    #[tokio::test]
    async fn test_shuffled_bulk_ingest_converges() {
        use rand::seq::SliceRandom;

        let store = GraphStore::new();
        let mut papers: Vec<Paper> = (0..100)
            .map(|i| paper(&format!("10.1/p{i}"), &format!("Paper {i}"), i))
            .collect();

        papers.shuffle(&mut rand::thread_rng());
        for p in &papers {
            store.upsert_paper(p.clone(), 0).await;
        }
        papers.shuffle(&mut rand::thread_rng());
        for p in papers {
            store.upsert_paper(p, 1).await;
        }

        assert_eq!(store.paper_count().await, 100);
    }
}
