//! CiteNet Engine
//!
//! Citation-network expansion and relevance scoring: turns seed queries
//! into a deduplicated, scored, multi-round graph of papers and
//! inter-paper relationships. Includes:
//! - Paper normalization and canonical-key deduplication
//! - The session-owned in-memory graph store
//! - Retrieval adapters (Semantic Scholar, CrossRef)
//! - AI relevance scoring with content-keyed caching
//! - The round-based expansion scheduler
//! - Result assembly for export/visualization consumers

pub mod assemble;
pub mod expand;
pub mod graph;
pub mod model;
pub mod normalize;
pub mod retrieval;
pub mod score;
pub mod session;

// Re-export commonly used types
pub use assemble::{export_view, ExportView};
pub use expand::{Completion, ExpansionScheduler, SchedulerState, SessionOutcome, StopReason};
pub use graph::{GraphSnapshot, GraphStore};
pub use model::{Paper, PaperKey, RawPaperRecord, SeedContext};
pub use retrieval::{CrossrefClient, RetrievalClient, SemanticScholarClient};
pub use score::{ClaudeScorer, RelevanceScorer, ScoringCapability};
pub use session::{MemorySessionStore, ResearchSession, SessionStore};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
