//! # Liftpass Core
//!
//! Session lifecycle for liftpass clients.
//!
//! This crate provides:
//! - Domain types for users, credentials and profile edits
//! - A key-value storage trait with memory, file and (optionally) keyring backends
//! - Typed persistence of the credential and user records
//! - A REST client for the liftpass API
//! - The session state machine, including silent single-flight token refresh
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use liftpass_core::{ApiClient, ApiConfig, FileStore, SessionManager};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = ApiClient::new(ApiConfig::new("https://api.example.com")?)?;
//!     let store = FileStore::open("/var/lib/liftpass")?;
//!     let session = SessionManager::start(store, api);
//!
//!     session.wait_until_restored().await;
//!     if !session.is_authenticated() {
//!         session.sign_in("ana@example.com", "secret").await?;
//!     }
//!     println!("signed in as {:?}", session.user());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod binding;
pub mod credentials;
pub mod error;
pub mod model;
pub mod session;
pub mod store;

// Re-export commonly used types at crate root
pub use model::{
    Avatar,
    Credential,
    NewAccount,
    ProfileUpdate,
    UserId,
    UserProfile,
};

pub use store::{
    FileStore,
    KeyValueStore,
    MemoryStore,
    Secret,
    StorageBackend,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use credentials::{
    CREDENTIAL_KEY,
    CredentialStore,
    USER_KEY,
};

pub use api::{
    ApiClient,
    ApiConfig,
    ApiError,
    FALLBACK_MESSAGE,
    MAX_AVATAR_BYTES,
    SessionGrant,
};

pub use binding::{
    AuthBinding,
    RefreshError,
};

pub use session::{
    Session,
    SessionEvent,
    SessionManager,
    SessionSnapshot,
    SessionState,
    SignOutReason,
    Subscription,
};

pub use error::SessionError;
