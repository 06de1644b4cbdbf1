//! Session records in the platform credential vault.

use async_trait::async_trait;
use keyring::Entry;

use super::{KeyValueStore, Secret, StoreError};

/// Record looked up once to check that the vault answers at all.
const AVAILABILITY_KEY: &str = "liftpass.available";

/// Keeps each record as a password in the OS credential vault.
///
/// Records live under one service name, one vault entry per key (the key is
/// the entry's account), so the credential and the user profile are written
/// and removed independently. An entry the vault does not hold reads as
/// absent.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Open the vault under `service`, failing with
    /// [`StoreError::KeyringUnavailable`] if no vault answers.
    pub fn try_new(service: &str) -> Result<Self, StoreError> {
        let store = Self {
            service: service.to_string(),
        };
        let entry = store.entry(AVAILABILITY_KEY).map_err(|_| StoreError::KeyringUnavailable {
            message: format!("cannot address entries for service {:?}", service),
        })?;
        match entry.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(store),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: e.to_string(),
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey { key: String::new() });
        }
        Entry::new(&self.service, key).map_err(|e| backend_error("address", key, e))
    }
}

/// Map a vault failure on `key` to a store error.
fn backend_error(action: &str, key: &str, error: keyring::Error) -> StoreError {
    let message = match error {
        keyring::Error::Ambiguous(_) => format!("several vault entries match {}", key),
        keyring::Error::NoStorageAccess(e) => {
            format!("vault locked or access denied, cannot {} {}: {}", action, key, e)
        }
        other => format!("failed to {} {}: {}", action, key, other),
    };
    StoreError::BackendError { message }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore").field("service", &self.service).finish()
    }
}

#[async_trait]
impl KeyValueStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(Secret::new(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(backend_error("read", key, e)),
        }
    }

    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value.expose())
            .map_err(|e| backend_error("write", key, e))?;
        tracing::debug!("Stored {} in the {} vault", key, self.service);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(backend_error("remove", key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialStore, USER_KEY};
    use crate::model::{Credential, UserProfile};

    /// A vault for this test run, or `None` where no vault daemon runs.
    fn vault(service: &str) -> Option<KeyringStore> {
        match KeyringStore::try_new(service) {
            Ok(store) => Some(store),
            Err(StoreError::KeyringUnavailable { message }) => {
                eprintln!("No credential vault here ({}), skipping", message);
                None
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_backend_error_names_key_and_action() {
        let err = backend_error("write", USER_KEY, keyring::Error::NoEntry);
        match err {
            StoreError::BackendError { message } => {
                assert!(message.starts_with("failed to write liftpass.user"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_keyring_rejects_empty_key() {
        let store = KeyringStore {
            service: "liftpass-test-keys".to_string(),
        };
        assert_eq!(store.service(), "liftpass-test-keys");
        assert!(matches!(store.get("").await, Err(StoreError::InvalidKey { .. })));
    }

    #[tokio::test]
    async fn test_keyring_holds_session_records_independently() {
        let Some(store) = vault("liftpass-test-records") else { return };
        let records = CredentialStore::new(store);
        if records.save_credential(&Credential::new("t1", "r1")).await.is_err() {
            eprintln!("Vault refused the write, skipping");
            return;
        }

        let user = UserProfile::new("1", "Ana", "ana@example.com");
        records.save_user(&user).await.unwrap();
        records.remove_credential().await.unwrap();

        // Some vaults accept writes they never persist.
        if let Ok(Some(stored)) = records.get_user().await {
            assert_eq!(stored, user);
            assert_eq!(records.get_credential().await.unwrap(), None);
        }
        records.clear().await.unwrap();
    }
}
