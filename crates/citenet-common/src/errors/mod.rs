//! Error types for the CiteNet engine
//!
//! Provides:
//! - Distinct error types for different failure modes
//! - Transient/permanent classification driving retry decisions
//! - Structured context for per-paper failure markers

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// External capability a failure originated from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Academic search backend (search, citations, references)
    Retrieval,
    /// AI relevance-scoring service
    Scoring,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Retrieval => write!(f, "retrieval"),
            Capability::Scoring => write!(f, "scoring"),
        }
    }
}

/// Classification of a failure for the retry helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff (timeout, rate limit, 5xx)
    Transient,
    /// Retrying will not help (malformed request, auth, other 4xx)
    Permanent,
    /// Control-flow signal (budget, cancellation) - never retried
    Control,
}

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    // Capability errors
    #[error("{capability} rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited {
        capability: Capability,
        retry_after_secs: Option<u64>,
    },

    #[error("{capability} call timed out after {timeout_secs}s")]
    CapabilityTimeout {
        capability: Capability,
        timeout_secs: u64,
    },

    #[error("{capability} upstream error {status}: {message}")]
    Upstream {
        capability: Capability,
        status: u16,
        message: String,
    },

    #[error("{capability} rejected request ({status}): {message}")]
    Rejected {
        capability: Capability,
        status: u16,
        message: String,
    },

    #[error("malformed {capability} response: {message}")]
    MalformedResponse {
        capability: Capability,
        message: String,
    },

    #[error("{capability} does not support {operation}")]
    Unsupported {
        capability: Capability,
        operation: String,
    },

    #[error("retries exhausted for {operation} after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    // Session control
    #[error("API call budget exhausted ({limit} calls)")]
    BudgetExhausted { limit: u32 },

    #[error("session cancelled")]
    SessionCancelled,

    #[error("round {round} failed: {message}")]
    RoundFailed { round: usize, message: String },

    // Infrastructure
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("persistence error: {message}")]
    Persistence { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Classify this error for the retry helper
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::RateLimited { .. }
            | EngineError::CapabilityTimeout { .. }
            | EngineError::Upstream { .. } => ErrorClass::Transient,

            EngineError::HttpClient(e) => {
                if e.is_timeout() || e.is_connect() {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }

            EngineError::BudgetExhausted { .. } | EngineError::SessionCancelled => {
                ErrorClass::Control
            }

            _ => ErrorClass::Permanent,
        }
    }

    /// Whether the retry helper should attempt this call again
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Server-suggested delay before retrying, if any
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            EngineError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(std::time::Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// Map an HTTP status from a capability into the taxonomy
    pub fn from_status(
        capability: Capability,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    ) -> Self {
        match status {
            429 => EngineError::RateLimited {
                capability,
                retry_after_secs,
            },
            500..=599 => EngineError::Upstream {
                capability,
                status,
                message,
            },
            _ => EngineError::Rejected {
                capability,
                status,
                message,
            },
        }
    }
}
