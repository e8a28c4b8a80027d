// Re-export shared types from interlink-types
pub use interlink_types::{error::*, *};

pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod communicator;
pub mod config;
pub mod crypto;
pub mod inbound;
pub mod keys;
pub mod logging;
pub mod registry;
pub mod retry;

pub use cache::ClientCache;
pub use circuit_breaker::{CircuitBreaker, CircuitState, Permit};
pub use client::{Method, ServiceClient, ServiceRequest, build_http_client};
pub use communicator::Communicator;
pub use config::{CommunicatorConfig, ObservabilityConfig, ServiceConfig};
pub use crypto::{PayloadCipher, derive_key};
pub use inbound::{SealedResponse, open_request, seal_response};
pub use keys::{KeySource, KeyStore, key_var_name};
pub use registry::{ServiceRegistry, join_url};
pub use retry::{RetryPolicy, RetryStrategy};
