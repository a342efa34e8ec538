//! OS-keyring credential storage for sync configurations.

use chronicle_core::credentials::CredentialStore;
use chronicle_core::models::SyncConfigId;
use chronicle_core::{Error, Result};

const SERVICE_NAME: &str = "chronicle-sync";

/// [`CredentialStore`] backed by the platform keyring.
#[derive(Default)]
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn entry(id: &SyncConfigId) -> Result<keyring::Entry> {
        keyring::Entry::new(SERVICE_NAME, &id.as_str())
            .map_err(|error| Error::CredentialStore(error.to_string()))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, id: &SyncConfigId) -> Result<Option<String>> {
        match Self::entry(id)?.get_password() {
            Ok(secret) => {
                let secret = secret.trim().to_string();
                if secret.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(secret))
                }
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(Error::CredentialStore(error.to_string())),
        }
    }

    fn set(&self, id: &SyncConfigId, secret: &str) -> Result<()> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(Error::InvalidInput(
                "Credential secret must not be empty".to_string(),
            ));
        }
        Self::entry(id)?
            .set_password(secret)
            .map_err(|error| Error::CredentialStore(error.to_string()))
    }

    fn delete(&self, id: &SyncConfigId) -> Result<()> {
        match Self::entry(id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(Error::CredentialStore(error.to_string())),
        }
    }
}
