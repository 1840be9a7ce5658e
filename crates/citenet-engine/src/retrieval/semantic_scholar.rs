//! Semantic Scholar Graph API client

use super::{make_limiter, s2_lookup_id, DirectLimiter, RetrievalClient};
use crate::model::{Paper, RawPaperRecord, S2Record};
use async_trait::async_trait;
use citenet_common::config::RetrievalConfig;
use citenet_common::errors::{Capability, EngineError, Result};
use citenet_common::metrics::CallTimer;
use citenet_common::retry::{with_retry, RetryPolicy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Fields requested on every paper record
const S2_FIELDS: &str =
    "paperId,title,authors,year,abstract,citationCount,url,venue,fieldsOfStudy,externalIds";

/// Semantic Scholar API client
pub struct SemanticScholarClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    limiter: DirectLimiter,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<S2Record>,
}

#[derive(Debug, Deserialize)]
struct LinkResponse {
    #[serde(default)]
    data: Vec<LinkEntry>,
}

#[derive(Debug, Deserialize)]
struct LinkEntry {
    #[serde(rename = "citingPaper")]
    citing_paper: Option<S2Record>,
    #[serde(rename = "citedPaper")]
    cited_paper: Option<S2Record>,
}

impl SemanticScholarClient {
    pub fn new(config: &RetrievalConfig, policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            limiter: make_limiter(config.requests_per_second),
            policy,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        self.limiter.until_ready().await;

        let timer = CallTimer::start("retrieval", "s2_get");
        let mut request = self
            .http
            .get(format!("{}/{}", self.base_url, path))
            .query(params);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::from_status(
                Capability::Retrieval,
                status.as_u16(),
                body.chars().take(200).collect(),
                retry_after,
            ));
        }

        let value = response
            .json::<T>()
            .await
            .map_err(|e| EngineError::MalformedResponse {
                capability: Capability::Retrieval,
                message: e.to_string(),
            })?;
        timer.finish();
        Ok(value)
    }

    fn lookup_id(&self, paper: &Paper, operation: &str) -> Result<String> {
        s2_lookup_id(paper).ok_or_else(|| EngineError::Unsupported {
            capability: Capability::Retrieval,
            operation: format!("{} for {} (no backend id)", operation, paper.key),
        })
    }

    fn wrap(records: Vec<S2Record>) -> Vec<RawPaperRecord> {
        records
            .into_iter()
            .map(RawPaperRecord::SemanticScholar)
            .collect()
    }
}

#[async_trait]
impl RetrievalClient for SemanticScholarClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawPaperRecord>> {
        debug!(query, limit, "Semantic Scholar search");
        let params = [
            ("query", query.to_string()),
            ("limit", limit.to_string()),
            ("fields", S2_FIELDS.to_string()),
        ];

        let response: SearchResponse = with_retry(&self.policy, "s2.search", || {
            self.get_json("paper/search", &params)
        })
        .await?;

        Ok(Self::wrap(response.data))
    }

    async fn get_citations(&self, paper: &Paper, limit: usize) -> Result<Vec<RawPaperRecord>> {
        let id = self.lookup_id(paper, "citations")?;
        debug!(key = %paper.key, limit, "Semantic Scholar citations");
        let params = [
            ("limit", limit.to_string()),
            ("fields", S2_FIELDS.to_string()),
        ];
        let path = format!("paper/{}/citations", id);

        let response: LinkResponse =
            with_retry(&self.policy, "s2.citations", || self.get_json(&path, &params)).await?;

        Ok(Self::wrap(
            response
                .data
                .into_iter()
                .filter_map(|entry| entry.citing_paper)
                .collect(),
        ))
    }

    async fn get_references(&self, paper: &Paper, limit: usize) -> Result<Vec<RawPaperRecord>> {
        let id = self.lookup_id(paper, "references")?;
        debug!(key = %paper.key, limit, "Semantic Scholar references");
        let params = [
            ("limit", limit.to_string()),
            ("fields", S2_FIELDS.to_string()),
        ];
        let path = format!("paper/{}/references", id);

        let response: LinkResponse =
            with_retry(&self.policy, "s2.references", || self.get_json(&path, &params)).await?;

        Ok(Self::wrap(
            response
                .data
                .into_iter()
                .filter_map(|entry| entry.cited_paper)
                .collect(),
        ))
    }
}
