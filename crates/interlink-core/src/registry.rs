//! Directory of peer services
//!
//! Maps a logical service name to its base URL and health path. Entries can be
//! marked unavailable without being removed, so callers can tell "we have never
//! heard of this service" apart from "this service is known to be down".

use std::collections::{BTreeMap, HashMap};

use interlink_types::{
    ServiceEndpoint, ServiceStatus,
    error::{Error, Result},
};
use parking_lot::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct RegisteredService {
    endpoint: ServiceEndpoint,
    status: ServiceStatus,
}

/// Service registry shared by every client in the process
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, RegisteredService>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with `endpoints`
    pub fn with_endpoints(endpoints: impl IntoIterator<Item = ServiceEndpoint>) -> Result<Self> {
        let registry = Self::new();
        for endpoint in endpoints {
            registry.register(endpoint)?;
        }
        Ok(registry)
    }

    /// Register or replace a service
    ///
    /// Re-registering a name overwrites the previous endpoint and resets its
    /// status to active.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `base_url` is not an absolute URL.
    pub fn register(&self, endpoint: ServiceEndpoint) -> Result<()> {
        url::Url::parse(&endpoint.base_url).map_err(|e| {
            Error::Config(format!(
                "Invalid base URL for service {}: {} ({})",
                endpoint.service_name, endpoint.base_url, e
            ))
        })?;

        let mut services = self.services.write();
        if services.contains_key(&endpoint.service_name) {
            warn!(service = %endpoint.service_name, "Service already registered, updating");
        }

        info!(
            service = %endpoint.service_name,
            base_url = %endpoint.base_url,
            "Service registered"
        );

        services.insert(
            endpoint.service_name.clone(),
            RegisteredService { endpoint, status: ServiceStatus::Active },
        );
        Ok(())
    }

    /// Look up an active service
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` if the service was never registered
    /// - `Error::Unavailable` if it is registered but marked unavailable
    pub fn resolve(&self, service_name: &str) -> Result<ServiceEndpoint> {
        let services = self.services.read();
        let service = services.get(service_name).ok_or_else(|| not_found(service_name))?;

        if service.status != ServiceStatus::Active {
            return Err(Error::Unavailable(format!("Service {} is not available", service_name)));
        }

        Ok(service.endpoint.clone())
    }

    /// Current status of a registered service
    pub fn status(&self, service_name: &str) -> Result<ServiceStatus> {
        self.services
            .read()
            .get(service_name)
            .map(|s| s.status)
            .ok_or_else(|| not_found(service_name))
    }

    /// Update the status of a registered service
    pub fn mark_status(&self, service_name: &str, status: ServiceStatus) -> Result<()> {
        let mut services = self.services.write();
        let service = services.get_mut(service_name).ok_or_else(|| not_found(service_name))?;
        service.status = status;
        info!(service = %service_name, status = %status, "Service status updated");
        Ok(())
    }

    /// Remove a service from the registry
    pub fn remove(&self, service_name: &str) -> Result<()> {
        self.services.write().remove(service_name).ok_or_else(|| not_found(service_name))?;
        info!(service = %service_name, "Service removed from registry");
        Ok(())
    }

    /// Names of all registered services, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Base URL of every registered service, keyed by name
    pub fn base_urls(&self) -> BTreeMap<String, String> {
        self.services
            .read()
            .iter()
            .map(|(name, s)| (name.clone(), s.endpoint.base_url.clone()))
            .collect()
    }

    /// Full URL of `path` on an active service
    pub fn url_for(&self, service_name: &str, path: &str) -> Result<String> {
        let endpoint = self.resolve(service_name)?;
        Ok(join_url(&endpoint.base_url, path))
    }

    /// Number of registered services
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

fn not_found(service_name: &str) -> Error {
    Error::NotFound(format!("Service {} not found in registry", service_name))
}

/// Join a base URL and a path with exactly one `/` between them
pub fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_registry() -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        registry.register(ServiceEndpoint::new("beta", "http://beta:9000")).unwrap();
        registry
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = create_test_registry();
        let endpoint = registry.resolve("beta").unwrap();
        assert_eq!(endpoint.base_url, "http://beta:9000");
        assert_eq!(endpoint.health_check_path, "/health");
    }

    #[test]
    fn test_register_overwrites() {
        let registry = create_test_registry();
        registry.register(ServiceEndpoint::new("beta", "http://beta-2:9001")).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("beta").unwrap().base_url, "http://beta-2:9001");
    }

    #[test]
    fn test_register_rejects_relative_url() {
        let registry = ServiceRegistry::new();
        let err = registry.register(ServiceEndpoint::new("beta", "beta:9000/api")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let registry = create_test_registry();
        assert!(matches!(registry.resolve("gamma"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_resolve_unavailable() {
        let registry = create_test_registry();
        registry.mark_status("beta", ServiceStatus::Unavailable).unwrap();

        assert!(matches!(registry.resolve("beta"), Err(Error::Unavailable(_))));
        assert_eq!(registry.status("beta").unwrap(), ServiceStatus::Unavailable);

        registry.mark_status("beta", ServiceStatus::Active).unwrap();
        assert!(registry.resolve("beta").is_ok());
    }

    #[test]
    fn test_reregister_resets_status() {
        let registry = create_test_registry();
        registry.mark_status("beta", ServiceStatus::Unavailable).unwrap();
        registry.register(ServiceEndpoint::new("beta", "http://beta:9000")).unwrap();
        assert!(registry.resolve("beta").is_ok());
    }

    #[test]
    fn test_mark_status_unknown() {
        let registry = create_test_registry();
        assert!(matches!(
            registry.mark_status("gamma", ServiceStatus::Unavailable),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remove() {
        let registry = create_test_registry();
        registry.remove("beta").unwrap();
        assert!(matches!(registry.resolve("beta"), Err(Error::NotFound(_))));
        assert!(matches!(registry.remove("beta"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_and_base_urls() {
        let registry = ServiceRegistry::with_endpoints([
            ServiceEndpoint::new("user-service", "http://user-service:8002"),
            ServiceEndpoint::new("analytics-service", "http://analytics-service:8000"),
        ])
        .unwrap();

        assert_eq!(registry.list(), vec!["analytics-service", "user-service"]);
        assert_eq!(
            registry.base_urls().get("user-service"),
            Some(&"http://user-service:8002".to_string())
        );
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://beta:9000", "e"), "http://beta:9000/e");
        assert_eq!(join_url("http://beta:9000/", "/e"), "http://beta:9000/e");
        assert_eq!(join_url("http://beta:9000//", "//e"), "http://beta:9000/e");
        assert_eq!(join_url("http://beta:9000/api", "v1/users"), "http://beta:9000/api/v1/users");
        assert_eq!(join_url("http://beta:9000", ""), "http://beta:9000/");
    }

    #[test]
    fn test_url_for() {
        let registry = create_test_registry();
        assert_eq!(registry.url_for("beta", "/e").unwrap(), "http://beta:9000/e");
        assert!(matches!(registry.url_for("gamma", "/e"), Err(Error::NotFound(_))));
    }
}
