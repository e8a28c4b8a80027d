use std::{path::Path, time::Duration};

use interlink_types::{
    ServiceEndpoint,
    error::{Error, Result},
};
use serde::{Deserialize, Serialize};

use crate::{
    circuit_breaker::CircuitBreaker,
    retry::{RetryPolicy, RetryStrategy},
};

/// Root configuration for a process using interlink
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommunicatorConfig {
    /// Defaults applied to every service client the process hands out
    #[serde(default)]
    pub service: ServiceConfig,

    /// Peers registered at startup
    #[serde(default)]
    pub peers: Vec<ServiceEndpoint>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Per-client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Name of the calling service
    /// Environment variable: MS_COMMUNICATOR__SERVICE__SERVICE_NAME
    #[serde(default)]
    pub service_name: String,

    /// Total attempts per call, including the first (1..=10)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Delay schedule between attempts
    #[serde(default)]
    pub retry_strategy: RetryStrategy,

    /// Per-attempt request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Consecutive failures before the circuit breaker opens
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Time an open breaker waits before letting a probe through, in milliseconds
    #[serde(default = "default_circuit_breaker_timeout_ms")]
    pub circuit_breaker_timeout_ms: u64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON logs instead of compact lines
    #[serde(default)]
    pub json_logs: bool,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_strategy: RetryStrategy::default(),
            timeout_ms: default_timeout_ms(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_timeout_ms: default_circuit_breaker_timeout_ms(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), json_logs: false }
    }
}

impl ServiceConfig {
    /// Default configuration for `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into(), ..Self::default() }
    }

    /// Copy of this configuration bound to another caller
    pub fn for_service(&self, service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into(), ..self.clone() }
    }

    /// Per-attempt request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry policy described by this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_delay_ms),
            self.retry_strategy,
        )
    }

    /// Fresh circuit breaker guarding `target`
    pub fn circuit_breaker(&self, target: &str) -> CircuitBreaker {
        CircuitBreaker::new(
            target,
            self.circuit_breaker_threshold,
            Duration::from_millis(self.circuit_breaker_timeout_ms),
        )
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(Error::Config("service_name must not be empty".to_string()));
        }
        if !(1..=10).contains(&self.retry_attempts) {
            return Err(Error::Config(format!(
                "retry_attempts must be between 1 and 10, got {}",
                self.retry_attempts
            )));
        }
        if self.retry_delay_ms < 100 {
            return Err(Error::Config(format!(
                "retry_delay_ms must be at least 100, got {}",
                self.retry_delay_ms
            )));
        }
        if self.timeout_ms < 100 {
            return Err(Error::Config(format!(
                "timeout_ms must be at least 100, got {}",
                self.timeout_ms
            )));
        }
        if self.circuit_breaker_threshold < 1 {
            return Err(Error::Config("circuit_breaker_threshold must be at least 1".to_string()));
        }
        if self.circuit_breaker_timeout_ms < 1000 {
            return Err(Error::Config(format!(
                "circuit_breaker_timeout_ms must be at least 1000, got {}",
                self.circuit_breaker_timeout_ms
            )));
        }
        Ok(())
    }
}

impl CommunicatorConfig {
    /// Load configuration from an optional file, overridden by environment
    /// variables prefixed with `MS_COMMUNICATOR__`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Layer 1 (defaults) is handled by serde deserialization
        let builder =
            config::Config::builder().add_source(config::File::from(path.as_ref()).required(false));

        let builder = builder.add_source(
            config::Environment::with_prefix("MS_COMMUNICATOR")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build config: {}", e)))?;

        config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))
    }

    /// Load configuration, falling back to defaults on failure
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => {
                tracing::info!("Configuration loaded successfully from {:?}", path.as_ref());
                config
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to load config from {:?}. Using defaults.",
                    path.as_ref()
                );
                Self::default()
            },
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        for peer in &self.peers {
            if peer.service_name.trim().is_empty() {
                return Err(Error::Config("peer service_name must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_service_config_defaults() {
        let config = ServiceConfig::new("alpha");
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay_ms, 1000);
        assert_eq!(config.retry_strategy, RetryStrategy::Exponential);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.circuit_breaker_threshold, 5);
        assert_eq!(config.circuit_breaker_timeout_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(ServiceConfig::default().validate().is_err());

        let config = ServiceConfig { retry_attempts: 0, ..ServiceConfig::new("alpha") };
        assert!(config.validate().is_err());

        let config = ServiceConfig { retry_attempts: 11, ..ServiceConfig::new("alpha") };
        assert!(config.validate().is_err());

        let config = ServiceConfig { retry_delay_ms: 50, ..ServiceConfig::new("alpha") };
        assert!(config.validate().is_err());

        let config = ServiceConfig { timeout_ms: 10, ..ServiceConfig::new("alpha") };
        assert!(config.validate().is_err());

        let config = ServiceConfig { circuit_breaker_threshold: 0, ..ServiceConfig::new("alpha") };
        assert!(config.validate().is_err());

        let config =
            ServiceConfig { circuit_breaker_timeout_ms: 500, ..ServiceConfig::new("alpha") };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_service_keeps_settings() {
        let defaults = ServiceConfig { retry_attempts: 7, ..ServiceConfig::default() };
        let config = defaults.for_service("beta");
        assert_eq!(config.service_name, "beta");
        assert_eq!(config.retry_attempts, 7);
    }

    #[test]
    fn test_builds_runtime_components() {
        let config = ServiceConfig {
            retry_attempts: 4,
            retry_delay_ms: 250,
            retry_strategy: RetryStrategy::Linear,
            circuit_breaker_threshold: 2,
            circuit_breaker_timeout_ms: 10_000,
            ..ServiceConfig::new("alpha")
        };

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));

        let breaker = config.circuit_breaker("beta");
        assert_eq!(breaker.name(), "beta");
        assert_eq!(breaker.failure_threshold(), 2);
        assert_eq!(breaker.reset_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file() {
        let path =
            std::env::temp_dir().join(format!("interlink-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[service]
service_name = "alpha"
retry_attempts = 5
retry_strategy = "linear"

[[peers]]
service_name = "beta"
base_url = "http://beta:9000"

[observability]
log_level = "debug"
"#
        )
        .unwrap();

        let config = CommunicatorConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.service.service_name, "alpha");
        assert_eq!(config.service.retry_attempts, 5);
        assert_eq!(config.service.retry_strategy, RetryStrategy::Linear);
        assert_eq!(config.service.timeout_ms, 5000);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].health_check_path, "/health");
        assert_eq!(config.observability.log_level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = CommunicatorConfig::load_or_default("/nonexistent/interlink.toml");
        assert!(config.peers.is_empty());
        assert_eq!(config.service.retry_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_unnamed_peer() {
        let config = CommunicatorConfig {
            service: ServiceConfig::new("alpha"),
            peers: vec![ServiceEndpoint::new("", "http://beta:9000")],
            observability: ObservabilityConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
