//! Claude scoring adapter
//!
//! Calls the Anthropic Messages API for relevance verdicts and
//! relationship classification. One attempt per call; retries live in
//! `RelevanceScorer` via the shared policy.

use super::{ClassifiedRelation, PaperSummary, ScoredRelevance, ScoringCapability};
use crate::model::{RelationType, SeedContext};
use crate::retrieval::{make_limiter, DirectLimiter};
use async_trait::async_trait;
use citenet_common::config::ScoringConfig;
use citenet_common::errors::{Capability, EngineError, Result};
use citenet_common::metrics::CallTimer;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude-backed scoring capability
pub struct ClaudeScorer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    limiter: DirectLimiter,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct RelevanceReply {
    priority: u8,
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct RelationReply {
    #[serde(rename = "type")]
    relation: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    description: Option<String>,
}

fn default_confidence() -> f32 {
    0.5
}

impl ClaudeScorer {
    pub fn new(config: &ScoringConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| EngineError::Configuration {
                message: "scoring.api_key is required for the Claude scorer".into(),
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            limiter: make_limiter(config.requests_per_second),
        })
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        self.limiter.until_ready().await;

        let timer = CallTimer::start("scoring", "messages");
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: 0.2,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
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
                Capability::Scoring,
                status.as_u16(),
                body.chars().take(200).collect(),
                retry_after,
            ));
        }

        let reply: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| EngineError::MalformedResponse {
                    capability: Capability::Scoring,
                    message: e.to_string(),
                })?;
        timer.finish();

        reply
            .content
            .first()
            .map(|block| block.text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| EngineError::MalformedResponse {
                capability: Capability::Scoring,
                message: "empty completion".into(),
            })
    }
}

/// Extract the first JSON object from a completion, tolerating prose or
/// code fences around it
fn extract_json(text: &str) -> Result<&str> {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(&text[start..=end]),
        _ => Err(EngineError::MalformedResponse {
            capability: Capability::Scoring,
            message: format!("no JSON object in completion: {:.80}", text),
        }),
    }
}

fn score_prompt(paper: &PaperSummary, context: &SeedContext) -> String {
    format!(
        "You are assessing academic paper relevance.\n\n\
         Research keywords: {}\n\
         Research description: {}\n\n\
         Paper title: {}\n\
         Paper abstract: {}\n\n\
         Rate the paper's relevance to the research need on a 1-5 scale \
         (5 = core, 4 = strongly related, 3 = related, 2 = tangential, 1 = irrelevant).\n\
         Reply with exactly one JSON object: {{\"priority\": <1-5>, \"reason\": \"<one sentence>\"}}",
        context.keywords(),
        if context.description.is_empty() {
            "(none provided)"
        } else {
            &context.description
        },
        paper.title,
        paper.abstract_snippet,
    )
}

fn relation_prompt(from: &PaperSummary, to: &PaperSummary) -> String {
    format!(
        "Paper A cites Paper B.\n\n\
         Paper A title: {}\n\
         Paper A abstract: {}\n\n\
         Paper B title: {}\n\
         Paper B abstract: {}\n\n\
         Classify the relationship of A to B as one of: improves_on, builds_on, \
         compares_to, unrelated, unknown.\n\
         Reply with exactly one JSON object: \
         {{\"type\": \"<label>\", \"confidence\": <0.0-1.0>, \"description\": \"<one sentence>\"}}",
        from.title, from.abstract_snippet, to.title, to.abstract_snippet,
    )
}

#[async_trait]
impl ScoringCapability for ClaudeScorer {
    async fn score_paper(
        &self,
        paper: &PaperSummary,
        context: &SeedContext,
    ) -> Result<ScoredRelevance> {
        debug!(title = %paper.title, "Scoring paper relevance");
        let completion = self.complete(score_prompt(paper, context)).await?;

        let reply: RelevanceReply = serde_json::from_str(extract_json(&completion)?)
            .map_err(|e| EngineError::MalformedResponse {
                capability: Capability::Scoring,
                message: format!("bad relevance reply: {}", e),
            })?;

        Ok(ScoredRelevance {
            priority: reply.priority,
            rationale: reply.reason,
        })
    }

    async fn classify_relationship(
        &self,
        from: &PaperSummary,
        to: &PaperSummary,
    ) -> Result<ClassifiedRelation> {
        debug!(from = %from.title, to = %to.title, "Classifying relationship");
        let completion = self.complete(relation_prompt(from, to)).await?;

        let reply: RelationReply = serde_json::from_str(extract_json(&completion)?)
            .map_err(|e| EngineError::MalformedResponse {
                capability: Capability::Scoring,
                message: format!("bad relationship reply: {}", e),
            })?;

        Ok(ClassifiedRelation {
            relation: RelationType::parse(&reply.relation),
            confidence: reply.confidence,
            description: reply.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_tolerates_fences() {
        let text = "Here is my verdict:\n```json\n{\"priority\": 4, \"reason\": \"close match\"}\n```";
        let json = extract_json(text).unwrap();
        let reply: RelevanceReply = serde_json::from_str(json).unwrap();
        assert_eq!(reply.priority, 4);
        assert_eq!(reply.reason, "close match");
    }

    #[test]
    fn test_extract_json_rejects_prose() {
        assert!(extract_json("I cannot answer that.").is_err());
    }

    #[test]
    fn test_relation_reply_maps_labels() {
        let json = r#"{"type": "improves_on", "confidence": 0.9, "description": "A refines B"}"#;
        let reply: RelationReply = serde_json::from_str(json).unwrap();
        assert_eq!(RelationType::parse(&reply.relation), RelationType::ImprovesOn);

        let json = r#"{"type": "something_else"}"#;
        let reply: RelationReply = serde_json::from_str(json).unwrap();
        assert_eq!(RelationType::parse(&reply.relation), RelationType::Unknown);
        assert!((reply.confidence - 0.5).abs() < f32::EPSILON);
    }
}
