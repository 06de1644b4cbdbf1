//! Durable key-value storage.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`KeyValueStore`] - Trait for persistence backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`FileStore`] - One file per key, replaced atomically on write
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend from configuration
//!
//! Values are opaque strings. Structured records are serialized by the layer
//! above (see [`crate::credentials`]); the store never interprets them.
//!
//! # Example
//!
//! ```rust,ignore
//! use liftpass_core::store::{KeyValueStore, MemoryStore, Secret};
//!
//! let store = MemoryStore::new();
//! store.set("liftpass.token", &Secret::new("{\"token\":\"a1\"}")).await?;
//!
//! let value = store.get("liftpass.token").await?;
//! assert!(value.is_some());
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use zeroize::Zeroize;

mod file;
mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use self::keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for key-value store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key contains characters the backend cannot address safely.
    #[error("invalid storage key: {key}")]
    InvalidKey { key: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// I/O error from a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over durable key-value backends.
///
/// Every key is independent: a write replaces one key atomically and there
/// is no transaction spanning several keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve the value stored at `key`.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a value at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError>;

    /// Remove a key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key).await
    }
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key).await
    }
}

/// Which backend [`create_store`] should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One file per key under the data directory.
    #[default]
    File,
    /// OS keyring, falling back to [`StorageBackend::File`] when unavailable.
    Keyring,
    /// Process memory only; nothing survives a restart.
    Memory,
}

/// Create a store for the requested backend.
///
/// # Backend Selection Logic
///
/// - `Keyring` with the `keyring-store` feature enabled: attempts a
///   [`KeyringStore`] and falls back to a [`FileStore`] in `data_dir` with a
///   warning if the keyring is unavailable.
/// - `Keyring` without the feature: warns and uses a [`FileStore`].
/// - `File`: a [`FileStore`] rooted at `data_dir`.
/// - `Memory`: a [`MemoryStore`].
pub fn create_store(
    backend: StorageBackend,
    data_dir: &Path,
) -> Result<Box<dyn KeyValueStore>, StoreError> {
    match backend {
        StorageBackend::Memory => {
            tracing::debug!("Using in-memory session storage");
            Ok(Box::new(MemoryStore::new()))
        }
        StorageBackend::Keyring => {
            #[cfg(feature = "keyring-store")]
            match KeyringStore::try_new("liftpass") {
                Ok(store) => {
                    tracing::info!("Using OS keyring for session storage");
                    return Ok(Box::new(store));
                }
                Err(e) => {
                    tracing::warn!(
                        "Keyring unavailable ({}), falling back to file storage in {:?}",
                        e,
                        data_dir
                    );
                }
            }

            #[cfg(not(feature = "keyring-store"))]
            tracing::warn!(
                "Keyring storage requested but keyring-store feature not enabled. \
                 Using file storage in {:?}",
                data_dir
            );

            Ok(Box::new(FileStore::open(data_dir)?))
        }
        StorageBackend::File => {
            tracing::debug!("Using file session storage in {:?}", data_dir);
            Ok(Box::new(FileStore::open(data_dir)?))
        }
    }
}
