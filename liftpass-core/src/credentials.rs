//! Typed persistence of the credential and user profile.
//!
//! [`CredentialStore`] layers two JSON records over a [`KeyValueStore`]:
//!
//! | key              | record                                  |
//! |------------------|-----------------------------------------|
//! | `liftpass.token` | `{"token": ..., "refresh_token": ...}`  |
//! | `liftpass.user`  | `{"id", "name", "email", "avatar"}`     |
//!
//! The two keys are written independently. A crash between the two writes
//! can leave one record without the other; callers treat that combination
//! as "no session" rather than trusting either half.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::model::{Credential, UserProfile};
use crate::store::{KeyValueStore, Secret, StoreError};

/// Key holding the serialized [`Credential`].
pub const CREDENTIAL_KEY: &str = "liftpass.token";

/// Key holding the serialized [`UserProfile`].
pub const USER_KEY: &str = "liftpass.user";

/// Credential and profile persistence over a key-value backend.
#[derive(Debug)]
pub struct CredentialStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> CredentialStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrow the underlying backend.
    pub fn backend(&self) -> &S {
        &self.store
    }

    pub async fn save_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        self.write(CREDENTIAL_KEY, credential).await
    }

    /// Read the stored credential.
    ///
    /// A record with a blank token reads back as `None`.
    pub async fn get_credential(&self) -> Result<Option<Credential>, StoreError> {
        let credential: Option<Credential> = self.read(CREDENTIAL_KEY).await?;
        Ok(credential.filter(|c| !c.is_empty()))
    }

    pub async fn remove_credential(&self) -> Result<(), StoreError> {
        self.store.remove(CREDENTIAL_KEY).await
    }

    pub async fn save_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.write(USER_KEY, user).await
    }

    /// Read the stored profile.
    ///
    /// A record without an id reads back as `None`.
    pub async fn get_user(&self) -> Result<Option<UserProfile>, StoreError> {
        let user: Option<UserProfile> = self.read(USER_KEY).await?;
        Ok(user.filter(|u| !u.is_empty()))
    }

    pub async fn remove_user(&self) -> Result<(), StoreError> {
        self.store.remove(USER_KEY).await
    }

    /// Remove both records, attempting each even if the other fails.
    ///
    /// Returns the first error encountered.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let credential = self.remove_credential().await;
        let user = self.remove_user().await;
        credential.and(user)
    }

    async fn write<T: Serialize>(&self, key: &str, record: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        self.store.set(key, &Secret::new(json)).await?;
        tracing::debug!("Saved record {}", key);
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(raw.expose())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> CredentialStore<MemoryStore> {
        CredentialStore::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_credential_round_trip() {
        let store = store();
        let credential = Credential::new("a1", "r1");

        store.save_credential(&credential).await.unwrap();
        assert_eq!(store.get_credential().await.unwrap(), Some(credential));

        store.remove_credential().await.unwrap();
        assert_eq!(store.get_credential().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_user_round_trip() {
        let store = store();
        let user = UserProfile::new("1", "Ana", "ana@example.com").with_avatar("ana.png");

        store.save_user(&user).await.unwrap();
        assert_eq!(store.get_user().await.unwrap(), Some(user));

        store.remove_user().await.unwrap();
        assert_eq!(store.get_user().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = store();
        store.save_credential(&Credential::new("a1", "r1")).await.unwrap();

        assert!(store.get_user().await.unwrap().is_none());
        assert!(store.get_credential().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let store = store();
        store.remove_credential().await.unwrap();
        store.remove_user().await.unwrap();
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_stored_record_shape() {
        let store = store();
        store.save_credential(&Credential::new("a1", "r1")).await.unwrap();

        let raw = store.backend().get(CREDENTIAL_KEY).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(raw.expose()).unwrap();
        assert_eq!(json, serde_json::json!({"token": "a1", "refresh_token": "r1"}));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let store = store();
        store
            .backend()
            .set(USER_KEY, &Secret::new("{not json"))
            .await
            .unwrap();

        assert!(matches!(
            store.get_user().await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_records_read_as_absent() {
        let store = store();
        store
            .backend()
            .set(CREDENTIAL_KEY, &Secret::new(r#"{"token":"","refresh_token":"r1"}"#))
            .await
            .unwrap();
        store
            .backend()
            .set(USER_KEY, &Secret::new(r#"{"id":""}"#))
            .await
            .unwrap();

        assert!(store.get_credential().await.unwrap().is_none());
        assert!(store.get_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_attempts_both_keys() {
        let store = store();
        store.save_credential(&Credential::new("a1", "r1")).await.unwrap();
        store.save_user(&UserProfile::new("1", "Ana", "a@b.c")).await.unwrap();
        store.backend().fail_writes(CREDENTIAL_KEY);

        assert!(store.clear().await.is_err());
        store.backend().heal();
        assert!(store.get_user().await.unwrap().is_none());
        assert!(store.get_credential().await.unwrap().is_some());
    }
}
