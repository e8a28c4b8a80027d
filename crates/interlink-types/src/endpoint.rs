//! Registry entities

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Network location of a peer service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    /// Logical service name (registry key)
    pub service_name: String,

    /// Base URL (e.g., "http://user-service:8002")
    pub base_url: String,

    /// Path of the peer's health endpoint
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,

    /// API version advertised by the peer
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Per-endpoint request timeout, used when a call supplies none
    #[serde(default, with = "optional_millis")]
    pub timeout: Option<Duration>,
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_protocol_version() -> String {
    "v1".to_string()
}

impl ServiceEndpoint {
    /// Create an endpoint with the default health path and protocol version
    pub fn new(service_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            base_url: base_url.into(),
            health_check_path: default_health_check_path(),
            protocol_version: default_protocol_version(),
            timeout: None,
        }
    }

    /// Set the health check path
    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = path.into();
        self
    }

    /// Set the protocol version
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Set the per-endpoint timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.service_name, self.base_url)
    }
}

/// Availability of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Service accepts traffic
    #[default]
    Active,

    /// Service is known but must not be called
    Unavailable,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Active => write!(f, "active"),
            ServiceStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

impl FromStr for ServiceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ServiceStatus::Active),
            "unavailable" => Ok(ServiceStatus::Unavailable),
            other => Err(Error::InvalidRequest(format!("Unknown service status: {}", other))),
        }
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
