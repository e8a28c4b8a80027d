//! Process-level owner of the registry and client cache
//!
//! Build one [`Communicator`] at startup and pass it (or the pieces it hands
//! out) to whatever needs to call peers. Call [`Communicator::shutdown`] on
//! teardown.

use std::{collections::BTreeMap, sync::Arc};

use interlink_types::{ServiceEndpoint, error::Result};
use tracing::info;

use crate::{
    cache::ClientCache,
    client::{ServiceClient, build_http_client},
    config::CommunicatorConfig,
    keys::KeySource,
    registry::ServiceRegistry,
};

#[derive(Debug)]
pub struct Communicator {
    config: CommunicatorConfig,
    registry: Arc<ServiceRegistry>,
    clients: ClientCache,
}

impl Communicator {
    /// Validate `config`, seed the registry with its peers and read keys from
    /// the process environment
    pub fn init(config: CommunicatorConfig) -> Result<Self> {
        Self::with_key_source(config, KeySource::Environment)
    }

    /// Same as [`Communicator::init`] with an explicit key source
    pub fn with_key_source(config: CommunicatorConfig, key_source: KeySource) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ServiceRegistry::with_endpoints(config.peers.iter().cloned())?);
        let clients = ClientCache::new(
            Arc::clone(&registry),
            build_http_client()?,
            config.service.clone(),
            key_source,
        );

        // Fail fast if the local service cannot encrypt
        clients.client_for(&config.service.service_name)?;

        info!(
            service = %config.service.service_name,
            peers = registry.len(),
            "Communicator initialized"
        );

        Ok(Self { config, registry, clients })
    }

    pub fn config(&self) -> &CommunicatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Client for the local service
    pub fn client(&self) -> Result<Arc<ServiceClient>> {
        self.clients.client_for(&self.config.service.service_name)
    }

    /// Client for `service_name`, created on first use
    pub fn client_for(&self, service_name: &str) -> Result<Arc<ServiceClient>> {
        self.clients.client_for(service_name)
    }

    /// Register or replace a peer
    pub fn register(&self, endpoint: ServiceEndpoint) -> Result<()> {
        self.registry.register(endpoint)
    }

    /// Look up an active peer
    pub fn resolve(&self, service_name: &str) -> Result<ServiceEndpoint> {
        self.registry.resolve(service_name)
    }

    /// Base URL of every registered peer
    pub fn list_services(&self) -> BTreeMap<String, String> {
        self.registry.base_urls()
    }

    /// Drop cached clients; in-flight calls keep their client until they finish
    pub fn shutdown(&self) {
        self.clients.clear();
        info!(service = %self.config.service.service_name, "Communicator shut down");
    }
}
