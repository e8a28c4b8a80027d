//! Encrypted, retrying HTTP client for calling peer services
//!
//! Every call resolves the target through the shared registry, encrypts the
//! payload with the caller's own key, and runs the HTTP exchange under the
//! target's circuit breaker wrapping the retry policy. Encrypted responses are
//! opened with the responder's key.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
    time::Duration,
};

use interlink_types::{
    ENCRYPTED_PAYLOAD_HEADER, ENCRYPTION_SERVICE_HEADER, EncryptedEnvelope, SERVICE_NAME_HEADER,
    TARGET_SERVICE_HEADER,
    error::{Error, Result},
};
use parking_lot::Mutex;
pub use reqwest::Method;
use reqwest::{
    Client as HttpClient,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitState},
    config::ServiceConfig,
    inbound::{encrypting_service, header_name, is_envelope},
    keys::KeyStore,
    registry::{ServiceRegistry, join_url},
    retry::RetryPolicy,
};

/// Build the HTTP client shared by every service client in a process
pub fn build_http_client() -> Result<HttpClient> {
    HttpClient::builder()
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// One call to a peer service
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    method: Method,
    path: String,
    payload: Option<Value>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl ServiceRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), payload: None, headers: Vec::new(), timeout: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Body to encrypt and send
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Extra request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Per-attempt timeout overriding the endpoint and client defaults
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Client used by one calling service to reach its peers
pub struct ServiceClient {
    config: ServiceConfig,
    registry: Arc<ServiceRegistry>,
    keys: Arc<KeyStore>,
    http_client: HttpClient,
    retry: RetryPolicy,
    /// One breaker per target service, created on first use
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service_name", &self.config.service_name)
            .field("retry", &self.retry)
            .field("keys", &self.keys)
            .finish()
    }
}

impl ServiceClient {
    /// Create a client for `config.service_name`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid or the key
    /// store belongs to a different service.
    pub fn new(
        config: ServiceConfig,
        registry: Arc<ServiceRegistry>,
        keys: Arc<KeyStore>,
        http_client: HttpClient,
    ) -> Result<Self> {
        config.validate()?;
        if keys.service_name() != config.service_name {
            return Err(Error::Config(format!(
                "Key store belongs to {}, not {}",
                keys.service_name(),
                config.service_name
            )));
        }

        info!(
            service = %config.service_name,
            retry_attempts = config.retry_attempts,
            retry_strategy = %config.retry_strategy,
            timeout_ms = config.timeout_ms,
            "Created service client"
        );

        Ok(Self {
            retry: config.retry_policy(),
            config,
            registry,
            keys,
            http_client,
            breakers: Mutex::new(HashMap::new()),
        })
    }

    /// Name of the calling service
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// State of the breaker guarding calls to `target_service`
    pub fn circuit_state(&self, target_service: &str) -> CircuitState {
        self.breakers
            .lock()
            .get(target_service)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Base URL of every registered service, keyed by name
    pub fn list_services(&self) -> BTreeMap<String, String> {
        self.registry.base_urls()
    }

    fn breaker_for(&self, target_service: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(target_service.to_string())
            .or_insert_with(|| Arc::new(self.config.circuit_breaker(target_service)));
        Arc::clone(breaker)
    }

    /// Send `request` to `target_service` and return its (decrypted) body
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` / `Error::Unavailable` if the target cannot be resolved
    /// - `Error::CircuitOpen` if the target's breaker refuses the call
    /// - `Error::Communication` on transport failure, non-2xx status or a
    ///   malformed encrypted response, after retries are exhausted
    /// - `Error::Encryption` if a payload cannot be sealed or opened
    pub async fn request(&self, target_service: &str, request: ServiceRequest) -> Result<Value> {
        let endpoint = self.registry.resolve(target_service)?;
        let url = join_url(&endpoint.base_url, &request.path);

        let body = match &request.payload {
            Some(payload) => {
                let encrypted = self.keys.own_cipher()?.encrypt(payload)?;
                Some(EncryptedEnvelope::new(encrypted).into_value())
            },
            None => None,
        };

        let headers = self.outbound_headers(target_service, &request, body.is_some())?;
        let timeout = request.timeout.or(endpoint.timeout).unwrap_or_else(|| self.config.timeout());
        let operation = format!("{} {}", request.method, url);
        let breaker = self.breaker_for(target_service);

        let url = url.as_str();
        let request = &request;
        let headers = &headers;
        let body = body.as_ref();
        breaker
            .call(self.retry.run(&operation, move || {
                self.send(target_service, url, request, headers, body, timeout)
            }))
            .await
    }

    /// Headers sent with every attempt of a call
    ///
    /// Caller headers go in first; the protocol headers are inserted last, so
    /// each name carries exactly one value and the caller cannot replace the
    /// identity or encryption markers.
    fn outbound_headers(
        &self,
        target_service: &str,
        request: &ServiceRequest,
        encrypted: bool,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            headers.insert(header_name(name)?, header_value(value)?);
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header_name(SERVICE_NAME_HEADER)?, header_value(self.service_name())?);
        headers.insert(header_name(TARGET_SERVICE_HEADER)?, header_value(target_service)?);

        if encrypted {
            let service = header_value(self.service_name())?;
            let flag = HeaderValue::from_static("true");
            headers.insert(header_name(ENCRYPTED_PAYLOAD_HEADER)?, flag);
            headers.insert(header_name(ENCRYPTION_SERVICE_HEADER)?, service);
        } else {
            headers.remove(ENCRYPTED_PAYLOAD_HEADER);
            headers.remove(ENCRYPTION_SERVICE_HEADER);
        }

        Ok(headers)
    }

    /// Whether `target_service` reports `{"status": "healthy"}`
    ///
    /// Never fails: any error is logged and reported as unhealthy.
    pub async fn health_check(&self, target_service: &str) -> bool {
        let path = match self.registry.resolve(target_service) {
            Ok(endpoint) => endpoint.health_check_path,
            Err(e) => {
                warn!(service = %target_service, error = %e, "Health check failed");
                return false;
            },
        };

        match self.request(target_service, ServiceRequest::get(path)).await {
            Ok(body) => {
                let healthy = body.get("status").and_then(Value::as_str) == Some("healthy");
                debug!(service = %target_service, healthy = healthy, "Health check completed");
                healthy
            },
            Err(e) => {
                warn!(service = %target_service, error = %e, "Health check failed");
                false
            },
        }
    }

    /// A single HTTP attempt
    async fn send(
        &self,
        target_service: &str,
        url: &str,
        request: &ServiceRequest,
        headers: &HeaderMap,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .timeout(timeout)
            .headers(headers.clone());

        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response =
            builder.send().await.map_err(|e| classify_transport_error(target_service, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Communication(format!(
                "Service {} returned {}: {}",
                target_service, status, text
            )));
        }

        let encrypted = is_envelope(response.headers());
        let responder = encrypting_service(response.headers()).map(str::to_string);
        let bytes =
            response.bytes().await.map_err(|e| classify_transport_error(target_service, e))?;

        if !encrypted {
            return Ok(plain_body(&bytes));
        }

        let responder = responder.ok_or_else(|| {
            Error::Communication(format!(
                "Encrypted response from {} is missing the {} header",
                target_service, ENCRYPTION_SERVICE_HEADER
            ))
        })?;

        let envelope = serde_json::from_slice::<Value>(&bytes)
            .ok()
            .as_ref()
            .and_then(EncryptedEnvelope::from_value)
            .ok_or_else(|| {
                Error::Communication(format!(
                    "Encrypted response from {} is not a valid envelope",
                    target_service
                ))
            })?;

        self.keys.cipher_for(&responder)?.decrypt(&envelope.encrypted_data)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::InvalidRequest(format!("Invalid header value {:?}: {}", value, e)))
}

/// JSON if the body parses, raw text otherwise, `null` when empty
fn plain_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Map a transport error onto the error taxonomy
///
/// Builder errors (e.g., an invalid header name) are programming errors and
/// are not retried; everything else counts as a communication failure.
pub fn classify_transport_error(target_service: &str, err: reqwest::Error) -> Error {
    if err.is_builder() {
        Error::InvalidRequest(format!("Invalid request to {}: {}", target_service, err))
    } else if err.is_timeout() {
        Error::Communication(format!("Request to {} timed out: {}", target_service, err))
    } else if err.is_connect() {
        Error::Communication(format!("Failed to connect to {}: {}", target_service, err))
    } else {
        Error::Communication(format!("Request to {} failed: {}", target_service, err))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::keys::KeySource;

    fn create_test_keys(service_name: &str) -> Arc<KeyStore> {
        let vars = [(crate::keys::key_var_name(service_name), "secret".to_string())];
        let source = KeySource::Static(vars.into_iter().collect());
        Arc::new(KeyStore::load(service_name, &source).unwrap())
    }

    #[test]
    fn test_request_builder() {
        let request = ServiceRequest::post("/e")
            .payload(json!({"x": 1}))
            .header("X-Request-Id", "abc")
            .timeout(Duration::from_secs(2));

        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.path(), "/e");
        assert_eq!(request.payload, Some(json!({"x": 1})));
        assert_eq!(request.headers, vec![("X-Request-Id".to_string(), "abc".to_string())]);
        assert_eq!(request.timeout, Some(Duration::from_secs(2)));

        assert_eq!(ServiceRequest::delete("/e").method(), &Method::DELETE);
        assert_eq!(ServiceRequest::patch("/e").method(), &Method::PATCH);
        assert_eq!(ServiceRequest::put("/e").method(), &Method::PUT);
        assert!(ServiceRequest::get("/e").payload.is_none());
    }

    #[test]
    fn test_plain_body() {
        assert_eq!(plain_body(br#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(plain_body(b"pong"), json!("pong"));
        assert_eq!(plain_body(b""), Value::Null);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let registry = Arc::new(ServiceRegistry::new());
        let config = ServiceConfig { retry_attempts: 0, ..ServiceConfig::new("alpha") };
        let result =
            ServiceClient::new(config, registry, create_test_keys("alpha"), HttpClient::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_new_rejects_foreign_key_store() {
        let registry = Arc::new(ServiceRegistry::new());
        let result = ServiceClient::new(
            ServiceConfig::new("alpha"),
            registry,
            create_test_keys("beta"),
            HttpClient::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    fn create_test_client() -> ServiceClient {
        ServiceClient::new(
            ServiceConfig::new("alpha"),
            Arc::new(ServiceRegistry::new()),
            create_test_keys("alpha"),
            HttpClient::new(),
        )
        .unwrap()
    }

    fn values<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
        headers.get_all(name).iter().map(|v| v.to_str().unwrap()).collect()
    }

    #[test]
    fn test_protocol_headers_replace_caller_values() {
        let client = create_test_client();
        let request = ServiceRequest::post("/e")
            .header("X-Service-Name", "mallory")
            .header("content-type", "text/plain")
            .header("X-Encryption-Service", "mallory")
            .header("X-Request-Id", "abc");

        let headers = client.outbound_headers("beta", &request, true).unwrap();
        assert_eq!(values(&headers, SERVICE_NAME_HEADER), vec!["alpha"]);
        assert_eq!(values(&headers, "content-type"), vec!["application/json"]);
        assert_eq!(values(&headers, TARGET_SERVICE_HEADER), vec!["beta"]);
        assert_eq!(values(&headers, ENCRYPTED_PAYLOAD_HEADER), vec!["true"]);
        assert_eq!(values(&headers, ENCRYPTION_SERVICE_HEADER), vec!["alpha"]);
        assert_eq!(values(&headers, "x-request-id"), vec!["abc"]);
    }

    #[test]
    fn test_plain_call_drops_encryption_headers() {
        let client = create_test_client();
        let request = ServiceRequest::get("/e")
            .header("X-Encrypted-Payload", "true")
            .header("X-Encryption-Service", "mallory");

        let headers = client.outbound_headers("beta", &request, false).unwrap();
        assert!(headers.get(ENCRYPTED_PAYLOAD_HEADER).is_none());
        assert!(headers.get(ENCRYPTION_SERVICE_HEADER).is_none());
        assert_eq!(values(&headers, SERVICE_NAME_HEADER), vec!["alpha"]);
    }

    #[test]
    fn test_invalid_caller_header_rejected() {
        let client = create_test_client();

        let request = ServiceRequest::get("/e").header("bad header", "x");
        let result = client.outbound_headers("beta", &request, false);
        assert!(matches!(result, Err(Error::InvalidRequest(_))));

        let request = ServiceRequest::get("/e").header("X-Note", "line\nbreak");
        let result = client.outbound_headers("beta", &request, false);
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_unknown_target_fails_before_network() {
        let registry = Arc::new(ServiceRegistry::new());
        let client = ServiceClient::new(
            ServiceConfig::new("alpha"),
            registry,
            create_test_keys("alpha"),
            HttpClient::new(),
        )
        .unwrap();

        let result = client.request("gamma", ServiceRequest::get("/e")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(client.circuit_state("gamma"), CircuitState::Closed);
        assert!(!client.health_check("gamma").await);
    }
}
