use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use interlink_types::error::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// PBKDF2 rounds used to stretch configured passphrases
pub const KDF_ITERATIONS: u32 = 100_000;

/// Fixed salt shared by every service so both ends derive the same key
const ENCRYPTION_SALT: &[u8] = b"priscope_salt";

/// Separate salt for the signing key so it never equals the encryption key
const SIGNING_SALT: &[u8] = b"priscope_signing_salt";

const NONCE_LEN: usize = 12;

/// Derive a 256-bit key from an arbitrary-length passphrase
pub fn derive_key(secret: &str) -> [u8; 32] {
    derive_with_salt(secret, ENCRYPTION_SALT)
}

fn derive_with_salt(secret: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, KDF_ITERATIONS, &mut key);
    key
}

/// Payload encryption for service-to-service traffic using AES-256-GCM
///
/// Every payload is serialized to JSON, sealed under a fresh random 96-bit
/// nonce with no associated data, and armored as base64 of
/// `nonce || ciphertext || tag`.
pub struct PayloadCipher {
    cipher: Aes256Gcm,
    signer: HmacSha256,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher").finish_non_exhaustive()
    }
}

impl PayloadCipher {
    /// Create a cipher from a configured passphrase
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Encryption("Encryption secret must not be empty".to_string()));
        }

        let key_bytes = derive_key(secret);
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| Error::Encryption(format!("Failed to initialize cipher: {}", e)))?;

        let signer = <HmacSha256 as Mac>::new_from_slice(&derive_with_salt(secret, SIGNING_SALT))
            .map_err(|e| Error::Encryption(format!("Failed to initialize signer: {}", e)))?;

        Ok(Self { cipher, signer })
    }

    /// Encrypt a payload and return it as a base64 string
    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T) -> Result<String> {
        let plaintext = serde_json::to_vec(payload)
            .map_err(|e| Error::Encryption(format!("Failed to serialize payload: {}", e)))?;
        self.encrypt_bytes(&plaintext)
    }

    fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Encryption(format!("Failed to encrypt payload: {}", e)))?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypt a base64-armored payload
    ///
    /// The plaintext is parsed as JSON when possible; anything else comes back
    /// as a JSON string holding the raw text.
    pub fn decrypt(&self, armored: &str) -> Result<Value> {
        let plaintext = self.decrypt_bytes(armored)?;

        match serde_json::from_slice(&plaintext) {
            Ok(value) => Ok(value),
            Err(_) => String::from_utf8(plaintext)
                .map(Value::String)
                .map_err(|e| Error::Encryption(format!("Decrypted payload is not UTF-8: {}", e))),
        }
    }

    /// Decrypt and deserialize into a concrete type
    pub fn decrypt_as<T: DeserializeOwned>(&self, armored: &str) -> Result<T> {
        let value = self.decrypt(armored)?;
        serde_json::from_value(value)
            .map_err(|e| Error::Encryption(format!("Failed to deserialize payload: {}", e)))
    }

    fn decrypt_bytes(&self, armored: &str) -> Result<Vec<u8>> {
        let combined = BASE64
            .decode(armored)
            .map_err(|e| Error::Encryption(format!("Failed to decode payload: {}", e)))?;

        if combined.len() < NONCE_LEN {
            return Err(Error::Encryption("Encrypted data too short (missing nonce)".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Encryption(format!("Failed to decrypt payload: {}", e)))
    }

    /// Sign a payload with HMAC-SHA256, returning a base64 tag
    ///
    /// The signing key is derived from the same passphrase as the encryption
    /// key, so any holder of the passphrase can verify.
    pub fn sign(&self, payload: &str) -> String {
        BASE64.encode(self.mac(payload).finalize().into_bytes())
    }

    /// Verify a signature produced by [`PayloadCipher::sign`]
    pub fn verify(&self, payload: &str, signature: &str) -> Result<()> {
        let tag = BASE64
            .decode(signature)
            .map_err(|e| Error::Encryption(format!("Failed to decode signature: {}", e)))?;

        self.mac(payload)
            .verify_slice(&tag)
            .map_err(|_| Error::Encryption("Signature verification failed".to_string()))
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac = self.signer.clone();
        mac.update(payload.as_bytes());
        mac
    }
}
