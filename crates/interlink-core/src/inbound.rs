//! Receiving side of an encrypted exchange
//!
//! A request body is opened with the key of the service named in
//! `X-Encryption-Service` (the sender). A response is sealed with the local
//! service's own key, so the original caller opens it with the responder's key.

use interlink_types::{
    ENCRYPTED_PAYLOAD_HEADER, ENCRYPTION_SERVICE_HEADER, EncryptedEnvelope,
    error::{Error, Result},
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::keys::KeyStore;

/// Whether the headers flag the body as an encrypted envelope
pub fn is_envelope(headers: &HeaderMap) -> bool {
    headers
        .get(ENCRYPTED_PAYLOAD_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Service whose key encrypted the body, if named
pub fn encrypting_service(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ENCRYPTION_SERVICE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Decrypt an incoming request body
///
/// Bodies not flagged as envelopes are returned unchanged.
///
/// # Errors
///
/// - `Error::InvalidRequest` if the body is flagged but the sender header or
///   envelope shape is missing
/// - `Error::Encryption` if the sender's key is unknown or decryption fails
pub fn open_request(keys: &KeyStore, headers: &HeaderMap, body: &Value) -> Result<Value> {
    if !is_envelope(headers) {
        return Ok(body.clone());
    }

    let sender = encrypting_service(headers).ok_or_else(|| {
        Error::InvalidRequest(format!(
            "Encrypted request is missing the {} header",
            ENCRYPTION_SERVICE_HEADER
        ))
    })?;
    let envelope = EncryptedEnvelope::from_value(body).ok_or_else(|| {
        Error::InvalidRequest("Encrypted request body is not a valid envelope".to_string())
    })?;

    debug!(sender = %sender, "Decrypting request payload");
    keys.cipher_for(sender)?.decrypt(&envelope.encrypted_data)
}

/// An encrypted response ready to send
#[derive(Debug, Clone)]
pub struct SealedResponse {
    pub body: Value,
    pub headers: HeaderMap,
}

/// Encrypt a response body with the local service's own key
pub fn seal_response<T: Serialize + ?Sized>(keys: &KeyStore, body: &T) -> Result<SealedResponse> {
    let encrypted = keys.own_cipher()?.encrypt(body)?;

    let service = HeaderValue::from_str(keys.service_name()).map_err(|e| {
        Error::InvalidRequest(format!("Invalid service name {}: {}", keys.service_name(), e))
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(header_name(ENCRYPTED_PAYLOAD_HEADER)?, HeaderValue::from_static("true"));
    headers.insert(header_name(ENCRYPTION_SERVICE_HEADER)?, service);

    Ok(SealedResponse { body: EncryptedEnvelope::new(encrypted).into_value(), headers })
}

pub(crate) fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::InvalidRequest(format!("Invalid header name {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::keys::KeySource;

    fn create_test_keys(service_name: &str) -> KeyStore {
        let vars: HashMap<String, String> = [
            ("ALPHA_ENCRYPTION_KEY".to_string(), "alpha-secret".to_string()),
            ("BETA_ENCRYPTION_KEY".to_string(), "beta-secret".to_string()),
        ]
        .into_iter()
        .collect();
        KeyStore::load(service_name, &KeySource::Static(vars)).unwrap()
    }

    fn envelope_headers(sender: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-encrypted-payload", HeaderValue::from_static("true"));
        headers.insert("x-encryption-service", HeaderValue::from_str(sender).unwrap());
        headers
    }

    #[test]
    fn test_plain_request_passes_through() {
        let beta = create_test_keys("beta");
        let body = json!({"x": 1});
        assert_eq!(open_request(&beta, &HeaderMap::new(), &body).unwrap(), body);
    }

    #[test]
    fn test_open_request_uses_sender_key() {
        let alpha = create_test_keys("alpha");
        let beta = create_test_keys("beta");

        let encrypted = alpha.own_cipher().unwrap().encrypt(&json!({"x": 1})).unwrap();
        let body = EncryptedEnvelope::new(encrypted).into_value();

        let opened = open_request(&beta, &envelope_headers("alpha"), &body).unwrap();
        assert_eq!(opened, json!({"x": 1}));

        // Opening with the wrong sender's key fails authentication
        let err = open_request(&beta, &envelope_headers("beta"), &body).unwrap_err();
        assert!(matches!(err, Error::Encryption(_)));
    }

    #[test]
    fn test_open_request_rejects_malformed() {
        let beta = create_test_keys("beta");

        let mut headers = HeaderMap::new();
        headers.insert("x-encrypted-payload", HeaderValue::from_static("true"));
        let body = json!({"encrypted_data": "abc"});
        assert!(matches!(open_request(&beta, &headers, &body), Err(Error::InvalidRequest(_))));

        let err = open_request(&beta, &envelope_headers("alpha"), &json!({"x": 1})).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_seal_response_round_trip() {
        let alpha = create_test_keys("alpha");
        let beta = create_test_keys("beta");

        let sealed = seal_response(&beta, &json!({"y": 2})).unwrap();
        assert!(is_envelope(&sealed.headers));
        assert_eq!(encrypting_service(&sealed.headers), Some("beta"));

        // The caller opens the response with the responder's key
        let opened = open_request(&alpha, &sealed.headers, &sealed.body).unwrap();
        assert_eq!(opened, json!({"y": 2}));
    }

    #[test]
    fn test_is_envelope_flag() {
        let mut headers = HeaderMap::new();
        assert!(!is_envelope(&headers));
        headers.insert("x-encrypted-payload", HeaderValue::from_static("TRUE"));
        assert!(is_envelope(&headers));
        headers.insert("x-encrypted-payload", HeaderValue::from_static("false"));
        assert!(!is_envelope(&headers));
    }
}
