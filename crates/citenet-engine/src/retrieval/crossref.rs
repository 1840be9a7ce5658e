//! CrossRef REST API client
//!
//! Search-only backend; CrossRef exposes no citation-list endpoints, so
//! `get_citations`/`get_references` report a permanent unsupported error
//! and the scheduler falls back to other backends for expansion.

use super::{make_limiter, DirectLimiter, RetrievalClient};
use crate::model::{CrossrefRecord, Paper, RawPaperRecord};
use async_trait::async_trait;
use citenet_common::config::RetrievalConfig;
use citenet_common::errors::{Capability, EngineError, Result};
use citenet_common::metrics::CallTimer;
use citenet_common::retry::{with_retry, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const CROSSREF_BASE: &str = "https://api.crossref.org/works";

/// CrossRef works client
pub struct CrossrefClient {
    http: reqwest::Client,
    base_url: String,
    mailto: String,
    limiter: DirectLimiter,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    message: WorksMessage,
}

#[derive(Debug, Deserialize)]
struct WorksMessage {
    #[serde(default)]
    items: Vec<CrossrefRecord>,
}

impl CrossrefClient {
    pub fn new(config: &RetrievalConfig, policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: CROSSREF_BASE.to_string(),
            mailto: config.crossref_mailto.clone(),
            limiter: make_limiter(config.requests_per_second),
            policy,
        })
    }

    async fn query_works(&self, query: &str, limit: usize) -> Result<WorksResponse> {
        self.limiter.until_ready().await;

        let timer = CallTimer::start("retrieval", "crossref_get");
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("query", query.to_string()),
                ("rows", limit.to_string()),
                ("mailto", self.mailto.clone()),
            ])
            .send()
            .await?;

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
            .json::<WorksResponse>()
            .await
            .map_err(|e| EngineError::MalformedResponse {
                capability: Capability::Retrieval,
                message: e.to_string(),
            })?;
        timer.finish();
        Ok(value)
    }
}

#[async_trait]
impl RetrievalClient for CrossrefClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawPaperRecord>> {
        debug!(query, limit, "CrossRef search");
        let response =
            with_retry(&self.policy, "crossref.search", || self.query_works(query, limit)).await?;

        Ok(response
            .message
            .items
            .into_iter()
            .map(RawPaperRecord::Crossref)
            .collect())
    }

    async fn get_citations(&self, _paper: &Paper, _limit: usize) -> Result<Vec<RawPaperRecord>> {
        Err(EngineError::Unsupported {
            capability: Capability::Retrieval,
            operation: "crossref citations".to_string(),
        })
    }

    async fn get_references(&self, _paper: &Paper, _limit: usize) -> Result<Vec<RawPaperRecord>> {
        Err(EngineError::Unsupported {
            capability: Capability::Retrieval,
            operation: "crossref references".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citenet_common::errors::ErrorClass;

    #[test]
    fn test_works_response_parses() {
        let json = r#"{
            "status": "ok",
            "message": {
                "items": [
                    {
                        "DOI": "10.1109/tits.2021.123",
                        "title": ["Simulation Platforms for Autonomous Systems"],
                        "author": [{"given": "Wei", "family": "Chen"}],
                        "issued": {"date-parts": [[2021, 3]]},
                        "container-title": ["IEEE T-ITS"],
                        "is-referenced-by-count": 17
                    }
                ]
            }
        }"#;
        let response: WorksResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.message.items.len(), 1);
        assert_eq!(response.message.items[0].is_referenced_by_count, 17);
    }

    #[tokio::test]
    async fn test_citation_lookup_is_permanent_unsupported() {
        let config = RetrievalConfig::default();
        let client = CrossrefClient::new(&config, RetryPolicy::default()).unwrap();
        let paper = crate::normalize::normalize(&RawPaperRecord::Crossref(CrossrefRecord {
            doi: Some("10.1/a".into()),
            title: vec!["T".into()],
            ..Default::default()
        }));

        let err = client.get_citations(&paper, 10).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Permanent);
    }
}
