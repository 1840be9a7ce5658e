//! Core data model for the citation graph
//!
//! Provides:
//! - Canonical paper identity (`PaperKey`) and the `Paper` node type
//! - Source-specific raw records as a tagged union
//! - Citation edges, score records, and relationship records
//! - Expansion round bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

/// Canonical deduplication identity of a paper.
///
/// Derived by the normalizer from the strongest available external
/// identifier: DOI, then arXiv id, then a title/author/year hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperKey(String);

impl PaperKey {
    /// Wrap an already-canonical key string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaperKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source-specific external identifier attached to a paper
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "scheme", content = "value", rename_all = "snake_case")]
pub enum ExternalId {
    Doi(String),
    Arxiv(String),
    SemanticScholar(String),
}

/// A paper node in the citation graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    /// Canonical deduplication key
    pub key: PaperKey,

    pub title: String,

    /// Ordered author names
    pub authors: Vec<String>,

    pub year: Option<i32>,

    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,

    pub venue: Option<String>,

    pub citation_count: u32,

    pub url: Option<String>,

    #[serde(default)]
    pub fields_of_study: Vec<String>,

    /// All source-specific identifiers seen for this paper
    #[serde(default)]
    pub external_ids: BTreeSet<ExternalId>,

    /// Full record payload from the richest retrieval source, if kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,

    pub discovered_at: DateTime<Utc>,

    /// Expansion round this paper first appeared in
    pub discovered_in_round: usize,

    /// Latest relevance outcome for the session's seed context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<RelevanceOutcome>,
}

impl Paper {
    /// First author, or "Unknown" for author-less records
    pub fn first_author(&self) -> &str {
        self.authors.first().map(String::as_str).unwrap_or("Unknown")
    }

    /// Assigned priority, if the paper was scored successfully
    pub fn priority(&self) -> Option<u8> {
        match &self.relevance {
            Some(RelevanceOutcome::Scored(score)) => Some(score.priority),
            _ => None,
        }
    }

    /// Whether scoring was attempted (successfully or not)
    pub fn scoring_attempted(&self) -> bool {
        self.relevance.is_some()
    }
}

/// Outcome of relevance scoring for one paper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelevanceOutcome {
    /// Capability returned a score
    Scored(ScoreRecord),
    /// Capability failed permanently; paper stays in the graph but is
    /// excluded from priority filtering
    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

/// Relevance score assigned by the scoring capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub paper_key: PaperKey,

    /// Priority 1 (irrelevant) to 5 (core)
    pub priority: u8,

    pub rationale: String,

    /// Keywords of the seed context this score answers
    pub seed_context: String,

    /// Content hash of (paper key, context fingerprint)
    pub cache_key: String,

    pub scored_at: DateTime<Utc>,
}

impl ScoreRecord {
    /// Cache key binding a paper to one scoring context version
    pub fn cache_key_for(paper_key: &PaperKey, context: &SeedContext) -> String {
        let mut hasher = Sha256::new();
        hasher.update(paper_key.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(context.fingerprint().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// The seed queries and description a session expands from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedContext {
    /// Seed search queries
    pub queries: Vec<String>,

    /// Free-text description of the research need
    pub description: String,

    /// Scoring-context version; changing it invalidates cached scores
    pub version: String,
}

impl SeedContext {
    pub fn new(queries: Vec<String>, description: impl Into<String>) -> Self {
        Self {
            queries,
            description: description.into(),
            version: "v1".to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Comma-joined seed keywords, used in prompts and score records
    pub fn keywords(&self) -> String {
        self.queries.join(", ")
    }

    /// Stable digest of the scoring context
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.keywords().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.description.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.version.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }
}

/// Direction of a citation edge relative to its `from` paper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeDirection {
    /// `from` cites `to`
    Cites,
    /// `from` is cited by `to`
    IsCitedBy,
}

impl EdgeDirection {
    pub fn reversed(self) -> Self {
        match self {
            EdgeDirection::Cites => EdgeDirection::IsCitedBy,
            EdgeDirection::IsCitedBy => EdgeDirection::Cites,
        }
    }
}

/// A citation edge between two papers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: PaperKey,
    pub to: PaperKey,
    pub direction: EdgeDirection,

    /// Expansion round this edge was discovered in
    pub discovered_in_round: usize,

    /// Lazily attached classification, present only for edges whose
    /// endpoints were both scored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<RelationshipRecord>,
}

/// Classified relationship between two papers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    ImprovesOn,
    BuildsOn,
    ComparesTo,
    Unrelated,
    Unknown,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::ImprovesOn => "improves_on",
            RelationType::BuildsOn => "builds_on",
            RelationType::ComparesTo => "compares_to",
            RelationType::Unrelated => "unrelated",
            RelationType::Unknown => "unknown",
        }
    }

    /// Parse a capability-reported type; unrecognized labels map to Unknown
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().replace('-', "_").as_str() {
            "improves_on" | "improves" => RelationType::ImprovesOn,
            "builds_on" | "extends" | "applies" => RelationType::BuildsOn,
            "compares_to" | "compares" => RelationType::ComparesTo,
            "unrelated" => RelationType::Unrelated,
            _ => RelationType::Unknown,
        }
    }
}

/// Relationship classification attached to an edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub from: PaperKey,
    pub to: PaperKey,
    pub relation: RelationType,

    /// Capability confidence in [0.0, 1.0]
    pub confidence: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub classified_at: DateTime<Utc>,
}

/// Status of one expansion round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Running,
    Completed,
    /// Sealed early because the session budget or paper cap was hit
    Truncated,
    Failed,
}

/// Append-only record of one expansion round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionRound {
    /// Round number; 0 is the seed round
    pub number: usize,

    /// Papers whose citations/references were expanded this round
    pub frontier: Vec<PaperKey>,

    /// New papers first discovered this round
    pub discovered: Vec<PaperKey>,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub status: RoundStatus,
}

// ---------------------------------------------------------------------------
// Raw records from retrieval backends
// ---------------------------------------------------------------------------

/// Heterogeneous raw record from a retrieval backend.
///
/// Each variant keeps the backend's own field shapes; the normalizer
/// dispatches on the variant tag to produce a canonical `Paper`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", content = "record", rename_all = "snake_case")]
pub enum RawPaperRecord {
    SemanticScholar(S2Record),
    Crossref(CrossrefRecord),
    Arxiv(ArxivRecord),
}

impl RawPaperRecord {
    pub fn source_name(&self) -> &'static str {
        match self {
            RawPaperRecord::SemanticScholar(_) => "semantic_scholar",
            RawPaperRecord::Crossref(_) => "crossref",
            RawPaperRecord::Arxiv(_) => "arxiv",
        }
    }
}

/// Paper record as returned by the Semantic Scholar Graph API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S2Record {
    pub paper_id: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<S2Author>,
    pub year: Option<i32>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub citation_count: Option<u32>,
    pub url: Option<String>,
    pub venue: Option<String>,
    pub fields_of_study: Option<Vec<String>>,
    pub external_ids: Option<S2ExternalIds>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S2Author {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S2ExternalIds {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "ArXiv")]
    pub arxiv: Option<String>,
}

/// Work record as returned by the CrossRef REST API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossrefRecord {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub author: Vec<CrossrefAuthor>,
    pub issued: Option<CrossrefDate>,
    #[serde(rename = "container-title", default)]
    pub container_title: Vec<String>,
    #[serde(rename = "is-referenced-by-count", default)]
    pub is_referenced_by_count: u32,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(rename = "URL")]
    pub url: Option<String>,
    #[serde(default)]
    pub subject: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossrefAuthor {
    pub given: Option<String>,
    pub family: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<i32>>,
}

/// Entry parsed from the arXiv Atom feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArxivRecord {
    /// arXiv identifier, possibly with a version suffix
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub summary: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_accessor() {
        let mut paper = Paper {
            key: PaperKey::new("doi:10.1000/xyz"),
            title: "Test".into(),
            authors: vec!["Ada Lovelace".into()],
            year: Some(2020),
            abstract_text: None,
            venue: None,
            citation_count: 3,
            url: None,
            fields_of_study: vec![],
            external_ids: BTreeSet::new(),
            raw: None,
            discovered_at: Utc::now(),
            discovered_in_round: 0,
            relevance: None,
        };
        assert_eq!(paper.priority(), None);
        assert!(!paper.scoring_attempted());

        paper.relevance = Some(RelevanceOutcome::Failed {
            reason: "auth failure".into(),
            failed_at: Utc::now(),
        });
        assert_eq!(paper.priority(), None);
        assert!(paper.scoring_attempted());
    }

    #[test]
    fn test_relation_type_parse() {
        assert_eq!(RelationType::parse("improves-on"), RelationType::ImprovesOn);
        assert_eq!(RelationType::parse("BUILDS_ON"), RelationType::BuildsOn);
        assert_eq!(RelationType::parse("extends"), RelationType::BuildsOn);
        assert_eq!(RelationType::parse("compares_to"), RelationType::ComparesTo);
        assert_eq!(RelationType::parse("???"), RelationType::Unknown);
    }

    #[test]
    fn test_cache_key_varies_with_context_version() {
        let key = PaperKey::new("doi:10.1000/xyz");
        let ctx_a = SeedContext::new(vec!["driving".into()], "");
        let ctx_b = ctx_a.clone().with_version("v2");
        assert_ne!(
            ScoreRecord::cache_key_for(&key, &ctx_a),
            ScoreRecord::cache_key_for(&key, &ctx_b)
        );
    }

    #[test]
    fn test_s2_record_parses_api_shape() {
        let json = r#"{
            "paperId": "649def34",
            "title": "End to End Learning for Self-Driving Cars",
            "authors": [{"name": "Mariusz Bojarski"}],
            "year": 2016,
            "abstract": "We trained a CNN...",
            "citationCount": 3000,
            "venue": "arXiv",
            "fieldsOfStudy": ["Computer Science"],
            "externalIds": {"DOI": "10.48550/arXiv.1604.07316", "ArXiv": "1604.07316"}
        }"#;
        let record: S2Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.citation_count, Some(3000));
        assert_eq!(record.authors.len(), 1);
        assert_eq!(
            record.external_ids.as_ref().unwrap().arxiv.as_deref(),
            Some("1604.07316")
        );
    }

    #[test]
    fn test_raw_record_roundtrip() {
        let record = RawPaperRecord::Crossref(CrossrefRecord {
            doi: Some("10.1109/TITS.2020.1".into()),
            title: vec!["A Survey".into()],
            ..Default::default()
        });
        let json = serde_json::to_string(&record).unwrap();
        let parsed: RawPaperRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.source_name(), "crossref");
    }
}
