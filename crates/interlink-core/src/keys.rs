//! Per-service encryption keys
//!
//! Keys come from environment-style variables named `<SERVICE>_ENCRYPTION_KEY`,
//! where `<SERVICE>` is the service name upper-cased with `-` replaced by `_`
//! (e.g., `user-service` reads `USER_SERVICE_ENCRYPTION_KEY`).

use std::{collections::HashMap, fmt, sync::Arc};

use interlink_types::error::{Error, Result};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::crypto::PayloadCipher;

const KEY_SUFFIX: &str = "_ENCRYPTION_KEY";

/// Where key variables are read from
#[derive(Debug, Clone, Default)]
pub enum KeySource {
    /// The process environment
    #[default]
    Environment,

    /// An explicit variable map (tests, embedded configuration)
    Static(HashMap<String, String>),
}

impl KeySource {
    /// Variables with their values, `None` where the value is not UTF-8
    ///
    /// Variables whose names are not UTF-8 cannot name a service and are left out.
    fn vars(&self) -> Vec<(String, Option<String>)> {
        match self {
            KeySource::Environment => std::env::vars_os()
                .filter_map(|(name, value)| {
                    Some((name.into_string().ok()?, value.into_string().ok()))
                })
                .collect(),
            KeySource::Static(vars) => {
                vars.iter().map(|(k, v)| (k.clone(), Some(v.clone()))).collect()
            },
        }
    }
}

/// Variable name holding the key of `service_name`
pub fn key_var_name(service_name: &str) -> String {
    format!("{}{}", service_name.to_uppercase().replace('-', "_"), KEY_SUFFIX)
}

fn service_name_from_var(var: &str) -> Option<String> {
    let prefix = var.strip_suffix(KEY_SUFFIX)?;
    if prefix.is_empty() {
        return None;
    }
    Some(prefix.to_lowercase().replace('_', "-"))
}

/// Secret passphrase that never prints
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// Keys known to one service: its own, plus any peers found alongside it
pub struct KeyStore {
    service_name: String,
    own_key: Secret,
    service_keys: HashMap<String, Secret>,
    ciphers: RwLock<HashMap<String, Arc<PayloadCipher>>>,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut peers: Vec<&String> = self.service_keys.keys().collect();
        peers.sort();
        f.debug_struct("KeyStore")
            .field("service_name", &self.service_name)
            .field("peers", &peers)
            .finish()
    }
}

impl KeyStore {
    /// Load keys for `service_name` from the given source
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the service's own key is missing, empty or
    /// not valid UTF-8.
    pub fn load(service_name: &str, source: &KeySource) -> Result<Self> {
        Self::from_vars(service_name, source.vars())
    }

    fn from_vars(
        service_name: &str,
        vars: impl IntoIterator<Item = (String, Option<String>)>,
    ) -> Result<Self> {
        let own_var = key_var_name(service_name);
        let mut own_key = None;
        let mut service_keys = HashMap::new();

        for (var, value) in vars {
            if var == own_var {
                let value = value.ok_or_else(|| {
                    Error::Config(format!(
                        "Own encryption key in environment variable {} is not valid UTF-8",
                        own_var
                    ))
                })?;
                own_key = Some(value);
                continue;
            }
            let Some(value) = value else {
                if service_name_from_var(&var).is_some() {
                    warn!(variable = %var, "Skipping encryption key that is not valid UTF-8");
                }
                continue;
            };
            if value.is_empty() {
                continue;
            }
            if let Some(peer) = service_name_from_var(&var) {
                debug!(service = %peer, "Loaded encryption key for service");
                service_keys.insert(peer, Secret(value));
            }
        }

        let own_key = match own_key {
            Some(key) if !key.is_empty() => Secret(key),
            _ => {
                return Err(Error::Config(format!(
                    "Own encryption key not found in environment variable: {}",
                    own_var
                )));
            },
        };

        info!(
            service = %service_name,
            peer_keys = service_keys.len(),
            "Loaded encryption keys"
        );

        Ok(Self {
            service_name: service_name.to_string(),
            own_key,
            service_keys,
            ciphers: RwLock::new(HashMap::new()),
        })
    }

    /// Load keys from the process environment
    pub fn from_env(service_name: &str) -> Result<Self> {
        Self::load(service_name, &KeySource::Environment)
    }

    /// Name of the service owning this store
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The local service's own key
    pub fn own_key(&self) -> &Secret {
        &self.own_key
    }

    /// Key for `service_name`, or `None` if it was not configured
    pub fn key_for(&self, service_name: &str) -> Option<&Secret> {
        if service_name == self.service_name {
            return Some(&self.own_key);
        }

        let key = self.service_keys.get(service_name);
        if key.is_none() {
            warn!(service = %service_name, "Encryption key not found for service");
        }
        key
    }

    /// Whether a key is known for `service_name`
    pub fn has_key(&self, service_name: &str) -> bool {
        service_name == self.service_name || self.service_keys.contains_key(service_name)
    }

    /// Cipher bound to the local service's own key
    pub fn own_cipher(&self) -> Result<Arc<PayloadCipher>> {
        self.cipher_for(&self.service_name)
    }

    /// Cipher bound to `service_name`'s key
    ///
    /// Derivation is expensive, so ciphers are built once and shared.
    pub fn cipher_for(&self, service_name: &str) -> Result<Arc<PayloadCipher>> {
        if let Some(cipher) = self.ciphers.read().get(service_name) {
            return Ok(Arc::clone(cipher));
        }

        let key = self.key_for(service_name).ok_or_else(|| {
            Error::Encryption(format!("Encryption key not found for service: {}", service_name))
        })?;
        let cipher = Arc::new(PayloadCipher::new(key.expose())?);

        let mut ciphers = self.ciphers.write();
        let cipher = ciphers.entry(service_name.to_string()).or_insert(cipher);
        Ok(Arc::clone(cipher))
    }
}
