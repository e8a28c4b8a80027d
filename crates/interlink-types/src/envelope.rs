//! Wire format shared by both ends of an encrypted exchange

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying the calling service's name
pub const SERVICE_NAME_HEADER: &str = "X-Service-Name";

/// Header carrying the callee's name
pub const TARGET_SERVICE_HEADER: &str = "X-Target-Service";

/// Header flagging the body as an [`EncryptedEnvelope`]
pub const ENCRYPTED_PAYLOAD_HEADER: &str = "X-Encrypted-Payload";

/// Header naming the service whose key encrypted the body
pub const ENCRYPTION_SERVICE_HEADER: &str = "X-Encryption-Service";

/// Body of an encrypted request or response
///
/// `encrypted_data` is base64 of `nonce (12 bytes) || ciphertext || tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub encrypted_data: String,
}

impl EncryptedEnvelope {
    pub fn new(encrypted_data: String) -> Self {
        Self { encrypted_data }
    }

    /// Extract an envelope from a JSON body
    ///
    /// Returns `None` unless the body is an object with a non-empty string
    /// `encrypted_data` field.
    pub fn from_value(body: &Value) -> Option<Self> {
        match body.get("encrypted_data") {
            Some(Value::String(data)) if !data.is_empty() => Some(Self::new(data.clone())),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::json!({ "encrypted_data": self.encrypted_data })
    }
}
