//! Credential storage abstraction.
//!
//! Sync credentials are referenced by config id and held out-of-band,
//! never embedded in `SyncConfig` or the relational store. The CLI wires
//! in an OS-keyring implementation; tests use [`MemoryCredentialStore`].

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::SyncConfigId;

/// Out-of-band secret storage keyed by sync config id.
pub trait CredentialStore: Send + Sync {
    /// Read the secret for a config. `Ok(None)` when absent.
    fn get(&self, id: &SyncConfigId) -> Result<Option<String>>;

    /// Store (or replace) the secret for a config.
    fn set(&self, id: &SyncConfigId, secret: &str) -> Result<()>;

    /// Remove the secret for a config. Succeeds when already absent.
    fn delete(&self, id: &SyncConfigId) -> Result<()>;
}

/// In-memory [`CredentialStore`] double.
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<SyncConfigId, String>>,
}

impl MemoryCredentialStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, id: &SyncConfigId) -> Result<Option<String>> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|_| Error::CredentialStore("credential lock poisoned".to_string()))?;
        Ok(secrets.get(id).cloned())
    }

    fn set(&self, id: &SyncConfigId, secret: &str) -> Result<()> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(Error::InvalidInput(
                "Credential secret must not be empty".to_string(),
            ));
        }
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|_| Error::CredentialStore("credential lock poisoned".to_string()))?;
        secrets.insert(*id, secret.to_string());
        Ok(())
    }

    fn delete(&self, id: &SyncConfigId) -> Result<()> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|_| Error::CredentialStore("credential lock poisoned".to_string()))?;
        secrets.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_delete() {
        let store = MemoryCredentialStore::new();
        let id = SyncConfigId::new();

        assert!(store.get(&id).unwrap().is_none());
        store.set(&id, " app-token ").unwrap();
        assert_eq!(store.get(&id).unwrap().as_deref(), Some("app-token"));

        store.delete(&id).unwrap();
        assert!(store.get(&id).unwrap().is_none());
        store.delete(&id).unwrap();
    }

    #[test]
    fn test_rejects_empty_secret() {
        let store = MemoryCredentialStore::new();
        assert!(store.set(&SyncConfigId::new(), "   ").is_err());
    }
}
