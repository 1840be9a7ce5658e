//! Configuration management for the CiteNet engine
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/<env>.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Expansion scheduler configuration
    #[serde(default)]
    pub expansion: ExpansionConfig,

    /// Retrieval capability configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Scoring capability configuration
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Retry/backoff policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExpansionConfig {
    /// Maximum expansion rounds (round 0 is the seed round)
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Minimum priority for a paper to enter the next frontier
    #[serde(default = "default_priority_threshold")]
    pub priority_threshold: u8,

    /// Papers fetched per seed query
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Citing papers kept per frontier paper
    #[serde(default = "default_citation_limit")]
    pub citation_limit: usize,

    /// References kept per frontier paper
    #[serde(default = "default_reference_limit")]
    pub reference_limit: usize,

    /// Global cap on discovered papers per session
    #[serde(default = "default_max_discovered")]
    pub max_discovered_papers: usize,

    /// Discard discovered papers below this citation count
    #[serde(default)]
    pub min_citation_count: u32,

    /// Discard discovered papers published before this year
    #[serde(default)]
    pub year_from: Option<i32>,

    /// Per-session capability-call budget (None = unlimited)
    #[serde(default = "default_call_budget")]
    pub api_call_budget: Option<u32>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            priority_threshold: default_priority_threshold(),
            search_limit: default_search_limit(),
            citation_limit: default_citation_limit(),
            reference_limit: default_reference_limit(),
            max_discovered_papers: default_max_discovered(),
            min_citation_count: 0,
            year_from: None,
            api_call_budget: default_call_budget(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Semantic Scholar Graph API base URL
    #[serde(default = "default_s2_base")]
    pub api_base: String,

    /// Semantic Scholar API key (raises rate limits, optional)
    pub api_key: Option<String>,

    /// Contact address sent to CrossRef for polite-pool access
    #[serde(default = "default_crossref_mailto")]
    pub crossref_mailto: String,

    /// Token-bucket refill rate for outbound requests
    #[serde(default = "default_retrieval_rps")]
    pub requests_per_second: u32,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent retrieval calls
    #[serde(default = "default_retrieval_concurrency")]
    pub max_concurrent: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            api_base: default_s2_base(),
            api_key: None,
            crossref_mailto: default_crossref_mailto(),
            requests_per_second: default_retrieval_rps(),
            timeout_secs: default_request_timeout(),
            max_concurrent: default_retrieval_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    /// Scoring service base URL
    #[serde(default = "default_scoring_base")]
    pub api_base: String,

    /// API key for the scoring service
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_scoring_model")]
    pub model: String,

    /// Maximum tokens per completion
    #[serde(default = "default_scoring_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_scoring_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent scoring calls
    #[serde(default = "default_scoring_concurrency")]
    pub max_concurrent: usize,

    /// Token-bucket refill rate for outbound requests
    #[serde(default = "default_scoring_rps")]
    pub requests_per_second: u32,

    /// Version tag mixed into score cache keys; bump to invalidate
    #[serde(default = "default_context_version")]
    pub context_version: String,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            api_base: default_scoring_base(),
            api_key: None,
            model: default_scoring_model(),
            max_tokens: default_scoring_max_tokens(),
            timeout_secs: default_scoring_timeout(),
            max_concurrent: default_scoring_concurrency(),
            requests_per_second: default_scoring_rps(),
            context_version: default_context_version(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum attempts per capability call (first call included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff delay cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Delay multiplier between attempts
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Randomization factor applied to each delay (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-formatted logs
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name attached to logs and metrics
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

fn default_max_rounds() -> usize { 3 }
fn default_priority_threshold() -> u8 { 4 }
fn default_search_limit() -> usize { 10 }
fn default_citation_limit() -> usize { 10 }
fn default_reference_limit() -> usize { 10 }
fn default_max_discovered() -> usize { 200 }
fn default_call_budget() -> Option<u32> { Some(500) }
fn default_s2_base() -> String { "https://api.semanticscholar.org/graph/v1".to_string() }
fn default_crossref_mailto() -> String { "citenet@example.com".to_string() }
fn default_retrieval_rps() -> u32 { 1 }
fn default_request_timeout() -> u64 { 30 }
fn default_retrieval_concurrency() -> usize { 5 }
fn default_scoring_base() -> String { "https://api.anthropic.com".to_string() }
fn default_scoring_model() -> String { "claude-3-5-haiku-20241022".to_string() }
fn default_scoring_max_tokens() -> u32 { 1000 }
fn default_scoring_timeout() -> u64 { 60 }
fn default_scoring_concurrency() -> usize { 8 }
fn default_scoring_rps() -> u32 { 1 }
fn default_context_version() -> String { "v1".to_string() }
fn default_max_attempts() -> u32 { 5 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_jitter() -> f64 { 0.3 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "citenet".to_string() }

impl EngineConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__EXPANSION__MAX_ROUNDS=5
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expansion: ExpansionConfig::default(),
            retrieval: RetrievalConfig::default(),
            scoring: ScoringConfig::default(),
            retry: RetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.expansion.max_rounds, 3);
        assert_eq!(config.expansion.priority_threshold, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.scoring.model, config.scoring.model);
        assert_eq!(parsed.expansion.max_discovered_papers, 200);
    }
}
