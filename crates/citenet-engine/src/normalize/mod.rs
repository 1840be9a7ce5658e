//! Paper normalization and deduplication
//!
//! Provides:
//! - Canonical-key derivation (DOI > arXiv id > title/author/year hash)
//! - Per-source adapters from raw records into the canonical `Paper` shape
//! - The merge policy applied on key collisions

use crate::model::{
    ArxivRecord, CrossrefRecord, ExternalId, Paper, PaperKey, RawPaperRecord, S2Record,
};
use chrono::Utc;
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

fn title_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9 ]").expect("valid regex"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn arxiv_version() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"v\d+$").expect("valid regex"))
}

fn jats_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

/// Normalize a raw record into the canonical `Paper` shape.
///
/// Pure: no graph access, no I/O. Round and discovery bookkeeping are
/// stamped with defaults and overwritten by the scheduler at ingestion.
pub fn normalize(record: &RawPaperRecord) -> Paper {
    match record {
        RawPaperRecord::SemanticScholar(r) => normalize_s2(r),
        RawPaperRecord::Crossref(r) => normalize_crossref(r),
        RawPaperRecord::Arxiv(r) => normalize_arxiv(r),
    }
}

/// Strip URL prefixes and lowercase a DOI
pub fn normalize_doi(raw: &str) -> String {
    let mut doi = raw.trim().to_lowercase();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ] {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.to_string();
        }
    }
    doi
}

/// Strip URL/scheme prefixes and the version suffix from an arXiv id
pub fn normalize_arxiv_id(raw: &str) -> String {
    let mut id = raw.trim().to_string();
    for prefix in ["https://arxiv.org/abs/", "http://arxiv.org/abs/"] {
        if let Some(rest) = id.strip_prefix(prefix) {
            id = rest.to_string();
        }
    }
    let lower = id.to_lowercase();
    if let Some(rest) = lower.strip_prefix("arxiv:") {
        id = rest.to_string();
    } else {
        id = lower;
    }
    arxiv_version().replace(&id, "").into_owned()
}

/// Lowercase, strip punctuation, collapse whitespace
fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = title_chars().replace_all(&lowered, "");
    whitespace().replace_all(stripped.trim(), " ").into_owned()
}

/// Surname heuristic: last whitespace-separated token of the first author
fn first_author_surname(authors: &[String]) -> String {
    authors
        .first()
        .and_then(|name| name.split_whitespace().last())
        .unwrap_or("unknown")
        .to_lowercase()
}

/// Derive the canonical key from the strongest available identifier.
///
/// The title-hash fallback can merge distinct papers whose normalized
/// title, first-author surname, and year all coincide; this is an
/// accepted risk, no semantic disambiguation is attempted.
pub fn canonical_key(
    doi: Option<&str>,
    arxiv: Option<&str>,
    title: &str,
    authors: &[String],
    year: Option<i32>,
) -> PaperKey {
    if let Some(doi) = doi.filter(|d| !d.trim().is_empty()) {
        return PaperKey::new(format!("doi:{}", normalize_doi(doi)));
    }
    if let Some(arxiv) = arxiv.filter(|a| !a.trim().is_empty()) {
        return PaperKey::new(format!("arxiv:{}", normalize_arxiv_id(arxiv)));
    }

    let mut hasher = Sha256::new();
    hasher.update(normalize_title(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(first_author_surname(authors).as_bytes());
    hasher.update(b"\n");
    if let Some(year) = year {
        hasher.update(year.to_string().as_bytes());
    }
    PaperKey::new(format!("title:{}", hex::encode(&hasher.finalize()[..16])))
}

fn normalize_s2(record: &S2Record) -> Paper {
    let authors: Vec<String> = record
        .authors
        .iter()
        .filter_map(|a| a.name.clone())
        .collect();

    let doi = record.external_ids.as_ref().and_then(|ids| ids.doi.clone());
    let arxiv = record.external_ids.as_ref().and_then(|ids| ids.arxiv.clone());
    let title = record.title.clone().unwrap_or_else(|| "Untitled".to_string());

    let key = canonical_key(
        doi.as_deref(),
        arxiv.as_deref(),
        &title,
        &authors,
        record.year,
    );

    let mut external_ids = std::collections::BTreeSet::new();
    if let Some(doi) = &doi {
        external_ids.insert(ExternalId::Doi(normalize_doi(doi)));
    }
    if let Some(arxiv) = &arxiv {
        external_ids.insert(ExternalId::Arxiv(normalize_arxiv_id(arxiv)));
    }
    if let Some(id) = &record.paper_id {
        external_ids.insert(ExternalId::SemanticScholar(id.clone()));
    }

    Paper {
        key,
        title,
        authors,
        year: record.year,
        abstract_text: record.abstract_text.clone().filter(|a| !a.is_empty()),
        venue: record.venue.clone().filter(|v| !v.is_empty()),
        citation_count: record.citation_count.unwrap_or(0),
        url: record.url.clone(),
        fields_of_study: record.fields_of_study.clone().unwrap_or_default(),
        external_ids,
        raw: serde_json::to_value(record).ok(),
        discovered_at: Utc::now(),
        discovered_in_round: 0,
        relevance: None,
    }
}

fn normalize_crossref(record: &CrossrefRecord) -> Paper {
    let authors: Vec<String> = record
        .author
        .iter()
        .map(|a| match (&a.given, &a.family) {
            (Some(given), Some(family)) => format!("{} {}", given, family),
            (None, Some(family)) => family.clone(),
            (Some(given), None) => given.clone(),
            (None, None) => "Unknown".to_string(),
        })
        .collect();

    let title = record
        .title
        .first()
        .cloned()
        .unwrap_or_else(|| "Untitled".to_string());

    let year = record
        .issued
        .as_ref()
        .and_then(|d| d.date_parts.first())
        .and_then(|parts| parts.first())
        .copied();

    let key = canonical_key(record.doi.as_deref(), None, &title, &authors, year);

    let mut external_ids = std::collections::BTreeSet::new();
    if let Some(doi) = &record.doi {
        external_ids.insert(ExternalId::Doi(normalize_doi(doi)));
    }

    // CrossRef abstracts come JATS-tagged
    let abstract_text = record
        .abstract_text
        .as_ref()
        .map(|a| jats_tag().replace_all(a, "").trim().to_string())
        .filter(|a| !a.is_empty());

    Paper {
        key,
        title,
        authors,
        year,
        abstract_text,
        venue: record.container_title.first().cloned().filter(|v| !v.is_empty()),
        citation_count: record.is_referenced_by_count,
        url: record.url.clone(),
        fields_of_study: record.subject.clone(),
        external_ids,
        raw: serde_json::to_value(record).ok(),
        discovered_at: Utc::now(),
        discovered_in_round: 0,
        relevance: None,
    }
}

fn normalize_arxiv(record: &ArxivRecord) -> Paper {
    let arxiv_id = normalize_arxiv_id(&record.id);
    let key = canonical_key(
        record.doi.as_deref(),
        Some(&arxiv_id),
        &record.title,
        &record.authors,
        record.year,
    );

    let mut external_ids = std::collections::BTreeSet::new();
    external_ids.insert(ExternalId::Arxiv(arxiv_id));
    if let Some(doi) = &record.doi {
        external_ids.insert(ExternalId::Doi(normalize_doi(doi)));
    }

    Paper {
        key,
        title: record.title.clone(),
        authors: record.authors.clone(),
        year: record.year,
        abstract_text: record.summary.clone().filter(|s| !s.is_empty()),
        venue: Some("arXiv".to_string()),
        citation_count: 0,
        url: record.url.clone(),
        fields_of_study: record.categories.clone(),
        external_ids,
        raw: serde_json::to_value(record).ok(),
        discovered_at: Utc::now(),
        discovered_in_round: 0,
        relevance: None,
    }
}

/// Merge an incoming duplicate into the stored paper.
///
/// Source-id sets are unioned. Content fields from the incoming record win
/// only where the stored field is empty, or where the incoming record is
/// fresher (strictly larger citation count). Returns true if anything
/// changed beyond timestamp bookkeeping.
pub fn merge(existing: &mut Paper, incoming: Paper) -> bool {
    let mut changed = false;

    let incoming_fresher = incoming.citation_count > existing.citation_count;

    for id in incoming.external_ids {
        changed |= existing.external_ids.insert(id);
    }

    if incoming_fresher {
        existing.citation_count = incoming.citation_count;
        changed = true;
    }

    if existing.abstract_text.is_none() || (incoming_fresher && incoming.abstract_text.is_some()) {
        if incoming.abstract_text.is_some() && existing.abstract_text != incoming.abstract_text {
            existing.abstract_text = incoming.abstract_text;
            changed = true;
        }
    }

    if existing.venue.is_none() || (incoming_fresher && incoming.venue.is_some()) {
        if incoming.venue.is_some() && existing.venue != incoming.venue {
            existing.venue = incoming.venue;
            changed = true;
        }
    }

    if existing.url.is_none() && incoming.url.is_some() {
        existing.url = incoming.url;
        changed = true;
    }

    if existing.year.is_none() && incoming.year.is_some() {
        existing.year = incoming.year;
        changed = true;
    }

    if existing.authors.is_empty() && !incoming.authors.is_empty() {
        existing.authors = incoming.authors;
        changed = true;
    }

    if existing.fields_of_study.is_empty() && !incoming.fields_of_study.is_empty() {
        existing.fields_of_study = incoming.fields_of_study;
        changed = true;
    }

    if existing.raw.is_none() || incoming_fresher {
        if incoming.raw.is_some() {
            existing.raw = incoming.raw;
        }
    }

    changed
}
