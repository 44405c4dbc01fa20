use std::collections::HashMap;

use thiserror::Error;

/// NVS namespace holding all provisioned values.
pub const STORAGE_NAMESPACE: &str = "data";

pub const KEY_WIFI_SSID: &str = "wifi_network";
pub const KEY_WIFI_PASS: &str = "wifi_passwd";
pub const KEY_AUTH_TOKEN: &str = "auth_token";
pub const KEY_UNIT_ID: &str = "id_key";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Persistent key-value storage collaborator.
///
/// A missing key is a normal outcome (`Ok(None)`), distinct from an I/O
/// failure on the backing store.
pub trait CredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Everything provisioning can have written, loaded in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub wifi_ssid: Option<String>,
    pub wifi_pass: Option<String>,
    pub auth_token: Option<String>,
    pub unit_id: Option<String>,
}

impl Credentials {
    pub fn load<S: CredentialStore>(store: &S) -> Result<Self, StorageError> {
        Ok(Self {
            wifi_ssid: store.get(KEY_WIFI_SSID)?,
            wifi_pass: store.get(KEY_WIFI_PASS)?,
            auth_token: store.get(KEY_AUTH_TOKEN)?,
            unit_id: store.get(KEY_UNIT_ID)?,
        })
    }

    pub fn is_provisioned(&self) -> bool {
        self.wifi_ssid.is_some()
            && self.wifi_pass.is_some()
            && self.auth_token.is_some()
            && self.unit_id.is_some()
    }
}

/// In-memory store for the host build and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
