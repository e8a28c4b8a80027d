use interlink_types::error::{Error, Result};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ObservabilityConfig;

/// Build the event filter: `RUST_LOG` first, then the configured level, then `info`
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize structured logging based on configuration
///
/// With `json_logs` set, logs are emitted as JSON for structured ingestion.
/// In development, logs use compact single-line formatting.
///
/// # Errors
///
/// Returns `Error::Config` if a global subscriber is already installed.
///
/// # Examples
///
/// ```no_run
/// use interlink_core::{config::ObservabilityConfig, logging};
///
/// let config = ObservabilityConfig { log_level: "debug".to_string(), json_logs: false };
/// logging::init(&config).unwrap();
/// ```
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = env_filter(config);

    let result = if config.json_logs {
        // Production: JSON structured logging
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()
    } else {
        // Development: compact single-line logging
        let fmt_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}
