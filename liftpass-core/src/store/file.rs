//! File-backed key-value storage implementation.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{KeyValueStore, Secret, StoreError};

/// Suffix for the scratch file a write lands in before it is renamed.
const PENDING_SUFFIX: &str = ".pending";

/// Disk-backed store keeping one file per key.
///
/// A write lands in `{key}.pending`, is flushed to disk and is then renamed
/// over `{key}`, so a crash or power loss mid-write leaves either the previous
/// value or the new one readable. Keys are independent
/// files; nothing ties two keys together.
///
/// # Example
///
/// ```rust,ignore
/// use liftpass_core::store::{FileStore, KeyValueStore, Secret};
///
/// let store = FileStore::open("/var/lib/liftpass")?;
/// store.set("liftpass.user", &Secret::new("{\"id\":\"1\"}")).await?;
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory holding the key files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.ends_with(PENDING_SUFFIX)
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(Secret::new(contents))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let pending = self.root.join(format!("{}{}", key, PENDING_SUFFIX));

        if let Err(e) = write_synced(&pending, value.expose().as_bytes()).await {
            let _ = tokio::fs::remove_file(&pending).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&pending, &path).await {
            let _ = tokio::fs::remove_file(&pending).await;
            return Err(e.into());
        }
        sync_dir(&self.root).await;

        tracing::debug!("Wrote {:?}", path);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

/// Persist the rename itself. Best effort.
#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    let synced = match tokio::fs::File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = synced {
        tracing::debug!("Failed to sync {:?}: {}", dir, e);
    }
}

/// Directories cannot be opened for syncing here.
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("state")).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_file_store_set_get() {
        let (store, _temp) = test_store();

        store.set("liftpass.token", &Secret::new("value")).await.unwrap();
        let retrieved = store.get("liftpass.token").await.unwrap();
        assert_eq!(retrieved.unwrap().expose(), "value");
    }

    #[tokio::test]
    async fn test_file_store_overwrite_leaves_no_pending_file() {
        let (store, _temp) = test_store();

        store.set("liftpass.user", &Secret::new("one")).await.unwrap();
        store.set("liftpass.user", &Secret::new("two")).await.unwrap();

        assert_eq!(store.get("liftpass.user").await.unwrap().unwrap().expose(), "two");
        assert!(!store.root().join("liftpass.user.pending").exists());
    }

    #[tokio::test]
    async fn test_file_store_shorter_value_replaces_longer() {
        let (store, _temp) = test_store();

        store
            .set("liftpass.token", &Secret::new("{\"token\":\"a-long-access-token\"}"))
            .await
            .unwrap();
        store.set("liftpass.token", &Secret::new("{}")).await.unwrap();

        let on_disk = std::fs::read_to_string(store.root().join("liftpass.token")).unwrap();
        assert_eq!(on_disk, "{}");
        assert!(!store.root().join("liftpass.token.pending").exists());
    }

    #[tokio::test]
    async fn test_file_store_stale_pending_does_not_shadow_value() {
        let (store, _temp) = test_store();
        store.set("liftpass.user", &Secret::new("committed")).await.unwrap();

        // Simulates a crash after the scratch write but before the rename.
        std::fs::write(store.root().join("liftpass.user.pending"), "torn").unwrap();

        assert_eq!(
            store.get("liftpass.user").await.unwrap().unwrap().expose(),
            "committed"
        );
    }

    #[tokio::test]
    async fn test_file_store_missing_key() {
        let (store, _temp) = test_store();
        assert!(store.get("liftpass.token").await.unwrap().is_none());
        store.remove("liftpass.token").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_rejects_escaping_keys() {
        let (store, _temp) = test_store();

        for key in ["../etc/passwd", "a/b", ".hidden", "", "x.pending"] {
            let result = store.set(key, &Secret::new("v")).await;
            assert!(
                matches!(result, Err(StoreError::InvalidKey { .. })),
                "key {:?} should be rejected",
                key
            );
        }
    }
}
