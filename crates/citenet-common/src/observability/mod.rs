//! Tracing initialization

use crate::config::ObservabilityConfig;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. Safe to call once per process;
/// subsequent calls are no-ops (the first subscriber wins).
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json_logging {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_ok() {
        tracing::info!(service = %config.service_name, "Tracing initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_reentrant() {
        let config = ObservabilityConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }
}
