//! Retry policy for capability calls
//!
//! Provides:
//! - An explicit policy object (attempts, delays, jitter)
//! - A single retry helper applied by every capability adapter
//! - Transient/permanent classification via `EngineError::class`

use crate::config::RetryConfig;
use crate::errors::{EngineError, Result};
use backoff::{future::retry_notify, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

/// Retry policy shared by the retrieval and scoring adapters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per call, first call included
    pub max_attempts: u32,

    /// Initial backoff delay
    pub base_delay: Duration,

    /// Backoff delay cap
    pub max_delay: Duration,

    /// Delay multiplier between attempts
    pub multiplier: f64,

    /// Randomization factor applied to each delay (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Build the backoff schedule for one call
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.jitter)
            // Attempt counting bounds the retries, not elapsed time
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run a capability call under the given policy.
///
/// Transient failures (rate limit, timeout, 5xx) are retried with exponential
/// backoff, honoring a server-provided `Retry-After` when present. Permanent
/// failures and exhausted attempts return immediately to the caller, which
/// records them as per-item failure markers.
pub async fn with_retry<T, Op, Fut>(policy: &RetryPolicy, operation: &str, mut op: Op) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = AtomicU32::new(0);

    retry_notify(
        policy.backoff(),
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            let fut = op();
            let attempts = &attempts;
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() && attempts.load(Ordering::SeqCst) < policy.max_attempts => {
                        metrics::counter!("citenet_capability_retries_total").increment(1);
                        Err(backoff::Error::Transient {
                            retry_after: e.retry_after(),
                            err: e,
                        })
                    }
                    Err(e) if e.is_retryable() => {
                        Err(backoff::Error::permanent(EngineError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempts.load(Ordering::SeqCst),
                            source: Box::new(e),
                        }))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        },
        |err: EngineError, delay: Duration| {
            warn!(
                operation,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Capability call failed, retrying"
            );
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Capability;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(5), "test.op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::RateLimited {
                        capability: Capability::Scoring,
                        retry_after_secs: None,
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(5), "test.op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(EngineError::Rejected {
                    capability: Capability::Retrieval,
                    status: 400,
                    message: "bad request".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(3), "test.op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(EngineError::Upstream {
                    capability: Capability::Retrieval,
                    status: 503,
                    message: "down".into(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(EngineError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {:?}", other.err()),
        }
    }
}
