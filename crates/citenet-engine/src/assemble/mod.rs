//! Result assembly
//!
//! Extracts the filtered, sorted paper/edge/relationship lists consumed
//! by export and visualization collaborators. Operates on read-only
//! snapshots; never mutates the graph.

use crate::graph::GraphSnapshot;
use crate::model::{EdgeDirection, Paper};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Export payload with stable field names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportView {
    pub papers: Vec<ExportPaper>,
    pub edges: Vec<ExportEdge>,
    pub relationships: Vec<ExportRelationship>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPaper {
    pub key: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub priority: u8,
    pub rationale: String,
    pub citation_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEdge {
    pub from: String,
    pub to: String,
    pub direction: EdgeDirection,
    pub discovered_in_round: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRelationship {
    pub from: String,
    pub to: String,
    pub relationship_type: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Build the export view: papers scored at or above `min_priority`,
/// sorted by priority descending then citation count descending, plus
/// the edges and relationship records connecting them.
///
/// Unscored papers and papers whose scoring failed are excluded here
/// but remain in the underlying graph.
pub fn export_view(snapshot: &GraphSnapshot, min_priority: u8) -> ExportView {
    let mut included: Vec<&Paper> = snapshot
        .papers
        .iter()
        .filter(|p| p.priority().is_some_and(|priority| priority >= min_priority))
        .collect();

    included.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then(b.citation_count.cmp(&a.citation_count))
    });

    let keys: HashSet<&str> = included.iter().map(|p| p.key.as_str()).collect();

    let papers = included
        .iter()
        .map(|p| ExportPaper {
            key: p.key.to_string(),
            title: p.title.clone(),
            authors: p.authors.clone(),
            year: p.year,
            priority: p.priority().unwrap_or_default(),
            rationale: match &p.relevance {
                Some(crate::model::RelevanceOutcome::Scored(score)) => score.rationale.clone(),
                _ => String::new(),
            },
            citation_count: p.citation_count,
        })
        .collect();

    let mut edges = Vec::new();
    let mut relationships = Vec::new();
    for edge in &snapshot.edges {
        if !keys.contains(edge.from.as_str()) || !keys.contains(edge.to.as_str()) {
            continue;
        }
        edges.push(ExportEdge {
            from: edge.from.to_string(),
            to: edge.to.to_string(),
            direction: edge.direction,
            discovered_in_round: edge.discovered_in_round,
        });
        if let Some(rel) = &edge.relationship {
            relationships.push(ExportRelationship {
                from: rel.from.to_string(),
                to: rel.to.to_string(),
                relationship_type: rel.relation.as_str().to_string(),
                confidence: rel.confidence,
                description: rel.description.clone(),
            });
        }
    }

    ExportView {
        papers,
        edges,
        relationships,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;
    use crate::model::{
        EdgeDirection, PaperKey, RawPaperRecord, S2Author, S2ExternalIds, S2Record, ScoreRecord,
        SeedContext,
    };
    use crate::normalize::normalize;
    use chrono::Utc;

    async fn scored_store() -> GraphStore {
        let store = GraphStore::new();
        let ctx = SeedContext::new(vec!["driving".into()], "");

        for (doi, title, citations, priority) in [
            ("10.1/a", "Alpha", 10u32, Some(5u8)),
            ("10.1/b", "Beta", 90, Some(4)),
            ("10.1/c", "Gamma", 50, Some(4)),
            ("10.1/d", "Delta", 70, Some(2)),
            ("10.1/e", "Epsilon", 30, None),
        ] {
            let paper = normalize(&RawPaperRecord::SemanticScholar(S2Record {
                paper_id: Some(doi.into()),
                title: Some(title.into()),
                authors: vec![S2Author {
                    name: Some("Jane Doe".into()),
                }],
                year: Some(2021),
                citation_count: Some(citations),
                external_ids: Some(S2ExternalIds {
                    doi: Some(doi.into()),
                    arxiv: None,
                }),
                ..Default::default()
            }));
            let key = store.upsert_paper(paper, 0).await.key;
            if let Some(priority) = priority {
                store
                    .attach_score(ScoreRecord {
                        paper_key: key.clone(),
                        priority,
                        rationale: format!("{title} verdict"),
                        seed_context: ctx.keywords(),
                        cache_key: ScoreRecord::cache_key_for(&key, &ctx),
                        scored_at: Utc::now(),
                    })
                    .await;
            }
        }

        // b cites a, d cites a; only the first connects two included papers
        store
            .upsert_edge(
                &PaperKey::new("doi:10.1/b"),
                &PaperKey::new("doi:10.1/a"),
                EdgeDirection::Cites,
                1,
            )
            .await;
        store
            .upsert_edge(
                &PaperKey::new("doi:10.1/d"),
                &PaperKey::new("doi:10.1/a"),
                EdgeDirection::Cites,
                1,
            )
            .await;
        store
    }

    #[tokio::test]
    async fn test_filter_and_ordering() {
        let store = scored_store().await;
        let view = export_view(&store.snapshot().await, 4);

        let titles: Vec<&str> = view.papers.iter().map(|p| p.title.as_str()).collect();
        // Priority desc, then citation count desc within priority 4
        assert_eq!(titles, vec!["Alpha", "Beta", "Gamma"]);
        assert_eq!(view.papers[0].priority, 5);
        assert!(!view.papers[0].rationale.is_empty());
    }

    #[tokio::test]
    async fn test_edges_restricted_to_included_papers() {
        let store = scored_store().await;
        let view = export_view(&store.snapshot().await, 4);

        assert_eq!(view.edges.len(), 1);
        assert_eq!(view.edges[0].from, "doi:10.1/b");
        assert_eq!(view.edges[0].to, "doi:10.1/a");
        // No classification attached, so no relationship rows
        assert!(view.relationships.is_empty());
    }

    #[tokio::test]
    async fn test_unscored_and_failed_papers_excluded() {
        let store = scored_store().await;
        store
            .attach_score_failure(&PaperKey::new("doi:10.1/e"), "permanent failure")
            .await;

        let view = export_view(&store.snapshot().await, 1);
        // Epsilon stays out even at the lowest threshold; Delta (priority
        // 2) comes in
        let titles: Vec<&str> = view.papers.iter().map(|p| p.title.as_str()).collect();
        assert!(titles.contains(&"Delta"));
        assert!(!titles.contains(&"Epsilon"));
    }
}
