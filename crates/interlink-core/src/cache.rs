//! One service client per calling service name

use std::{collections::HashMap, sync::Arc};

use interlink_types::error::Result;
use parking_lot::Mutex;
use reqwest::Client as HttpClient;
use tracing::{debug, info};

use crate::{
    client::ServiceClient,
    config::ServiceConfig,
    keys::{KeySource, KeyStore},
    registry::ServiceRegistry,
};

/// Memoized [`ServiceClient`]s sharing one registry and connection pool
pub struct ClientCache {
    registry: Arc<ServiceRegistry>,
    http_client: HttpClient,
    defaults: ServiceConfig,
    key_source: KeySource,
    clients: Mutex<HashMap<String, Arc<ServiceClient>>>,
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.clients.lock().keys().cloned().collect();
        names.sort();
        f.debug_struct("ClientCache").field("clients", &names).finish()
    }
}

impl ClientCache {
    /// Create an empty cache
    ///
    /// `defaults` supplies every setting except the service name, which is
    /// taken from the name passed to [`ClientCache::client_for`].
    pub fn new(
        registry: Arc<ServiceRegistry>,
        http_client: HttpClient,
        defaults: ServiceConfig,
        key_source: KeySource,
    ) -> Self {
        Self { registry, http_client, defaults, key_source, clients: Mutex::new(HashMap::new()) }
    }

    /// Client for `service_name`, created on first use
    ///
    /// Concurrent callers asking for the same name always get the same client.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the service's own key is missing or the
    /// default configuration is invalid. Nothing is cached on failure.
    pub fn client_for(&self, service_name: &str) -> Result<Arc<ServiceClient>> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(service_name) {
            debug!(service = %service_name, "Using cached service client");
            return Ok(Arc::clone(client));
        }

        let keys = Arc::new(KeyStore::load(service_name, &self.key_source)?);
        let client = Arc::new(ServiceClient::new(
            self.defaults.for_service(service_name),
            Arc::clone(&self.registry),
            keys,
            self.http_client.clone(),
        )?);

        clients.insert(service_name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Shared registry
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Drop every cached client
    pub fn clear(&self) {
        let mut clients = self.clients.lock();
        let count = clients.len();
        clients.clear();
        info!(count = count, "Cleared cached service clients");
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}
