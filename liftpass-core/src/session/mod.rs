//! Session state machine and the facade callers use.
//!
//! [`SessionManager`] owns the in-memory session, the loading flag, the
//! persisted records (through [`CredentialStore`]) and the bearer token bound
//! to outgoing requests (through [`AuthBinding`]). It is constructed once at
//! application start with [`SessionManager::start`], passed by reference to
//! whatever needs it, and torn down with [`SessionManager::shutdown`].
//!
//! # Ordering
//!
//! - The launch restore runs first. Every mutating operation waits for it.
//! - Each sign-in and each sign-out, requested or forced, bumps a generation
//!   counter under the state lock. A sign-in, profile update or refresh that
//!   started under an older generation discards its result with
//!   [`SessionError::Superseded`], so the last transition requested is the
//!   one that sticks.
//! - Store writes are serialized by a commit lock; the in-memory transition
//!   happens under the state lock after the write it depends on.
//! - Transitions and their observer notifications are serialized by a
//!   delivery lock, so observers see events in transition order.
//!
//! # Example
//!
//! ```rust,ignore
//! use liftpass_core::{ApiClient, ApiConfig, MemoryStore, SessionManager};
//!
//! let api = ApiClient::new(ApiConfig::new("https://api.example.com")?)?;
//! let session = SessionManager::start(MemoryStore::new(), api);
//!
//! session.wait_until_restored().await;
//! if session.user().is_none() {
//!     session.sign_in("ana@example.com", "secret").await?;
//! }
//! let history: serde_json::Value = session.get_json("/history").await?;
//! ```

mod observers;
mod state;

pub use observers::Subscription;
pub use state::{Session, SessionEvent, SessionSnapshot, SessionState, SignOutReason};

use std::future::Future;
use std::sync::Arc;

use futures::future::FutureExt;
use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, SessionGrant};
use crate::binding::{AuthBinding, RefreshError};
use crate::credentials::CredentialStore;
use crate::error::SessionError;
use crate::model::{Avatar, Credential, NewAccount, ProfileUpdate, UserProfile};
use crate::store::{KeyValueStore, Secret};
use observers::Observers;

/// State plus the number of sessions begun or ended so far.
#[derive(Debug, Default)]
struct Machine {
    state: SessionState,
    generation: u64,
}

struct Inner<S: KeyValueStore> {
    credentials: CredentialStore<S>,
    api: ApiClient,
    binding: AuthBinding,
    machine: RwLock<Machine>,
    commit: tokio::sync::Mutex<()>,
    restored: watch::Sender<bool>,
    observers: Observers,
    /// Held from a state change until its observers have been notified.
    delivery: Mutex<()>,
    last_restore_error: Mutex<Option<String>>,
}

/// The session facade.
pub struct SessionManager<S: KeyValueStore + 'static> {
    inner: Arc<Inner<S>>,
    restore_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: KeyValueStore + 'static> SessionManager<S> {
    /// Create the manager and begin restoring the stored session.
    ///
    /// Returns immediately in the `Restoring` state; the restore runs on the
    /// tokio runtime. Must be called from within a runtime.
    pub fn start(store: S, api: ApiClient) -> Self {
        let (restored, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            credentials: CredentialStore::new(store),
            api,
            binding: AuthBinding::new(),
            machine: RwLock::new(Machine::default()),
            commit: tokio::sync::Mutex::new(()),
            restored,
            observers: Observers::default(),
            delivery: Mutex::new(()),
            last_restore_error: Mutex::new(None),
        });

        let task = tokio::spawn({
            let inner = Arc::clone(&inner);
            async move { inner.restore().await }
        });

        Self {
            inner,
            restore_task: Mutex::new(Some(task)),
        }
    }

    /// Stop the manager: abort a pending restore and drop all observers.
    ///
    /// A manager shut down mid-restore settles as signed out. Stored data is
    /// left alone.
    pub fn shutdown(&self) {
        if let Some(task) = self.restore_task.lock().take() {
            task.abort();
        }
        self.inner.settle(None);
        self.inner.restored.send_replace(true);
        self.inner.observers.clear();
        debug!("Session manager shut down");
    }

    /// Resolve once the launch restore has settled.
    pub async fn wait_until_restored(&self) {
        let mut restored = self.inner.restored.subscribe();
        let _ = restored.wait_for(|done| *done).await;
    }

    /// The signed-in user, if any.
    pub fn user(&self) -> Option<UserProfile> {
        self.inner.machine.read().state.session().map(|s| s.user.clone())
    }

    /// `true` until the launch restore settles.
    pub fn is_restoring(&self) -> bool {
        matches!(self.inner.machine.read().state, SessionState::Restoring)
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.machine.read().state.session().is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::from(&self.inner.machine.read().state)
    }

    /// The `Authorization` header outgoing requests carry right now.
    pub fn authorization_header(&self) -> Option<String> {
        self.inner.binding.authorization_header()
    }

    /// What went wrong reading stored data at launch, if anything did.
    pub fn last_restore_error(&self) -> Option<String> {
        self.inner.last_restore_error.lock().clone()
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn credentials(&self) -> &CredentialStore<S> {
        &self.inner.credentials
    }

    /// Call `observer` synchronously after every state transition.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(observer)
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.inner.observers.unsubscribe(subscription)
    }

    /// Sign in with email and password.
    ///
    /// On success both records are persisted and the session becomes
    /// authenticated. On failure the state and the store are left as they
    /// were, except that a failed store write rolls everything back to
    /// signed out.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), SessionError> {
        self.wait_until_restored().await;
        let generation = self.inner.generation();

        info!("Signing in {}", email);
        let grant = match self.inner.api.create_session(email, &Secret::new(password)).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!("Sign-in failed: {}", e);
                return Err(e.into());
            }
        };

        self.inner.commit_sign_in(generation, grant).await
    }

    /// Create an account, then sign in with it.
    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<(), SessionError> {
        self.wait_until_restored().await;

        info!("Creating account for {}", email);
        let account = NewAccount::new(name, email, password);
        if let Err(e) = self.inner.api.create_user(&account).await {
            warn!("Sign-up failed: {}", e);
            return Err(e.into());
        }

        self.sign_in(email, password).await
    }

    /// Sign out.
    ///
    /// Always ends signed out, however many times it is called. Failing to
    /// remove the stored records is logged, not returned.
    pub async fn sign_out(&self) {
        self.wait_until_restored().await;
        self.inner.end_session(None, SignOutReason::Requested).await;
    }

    /// Replace the signed-in user's profile and persist it.
    ///
    /// The credential is untouched. Fails with
    /// [`SessionError::NotAuthenticated`] when nobody is signed in and with
    /// [`SessionError::ProfileMismatch`] when `profile` belongs to someone
    /// else. Nothing changes in memory unless the store write succeeds.
    pub async fn update_user_profile(&self, profile: UserProfile) -> Result<(), SessionError> {
        self.wait_until_restored().await;
        self.inner.replace_profile(profile).await
    }

    /// Send a profile edit to the server, then store the new name.
    pub async fn save_profile(&self, update: ProfileUpdate) -> Result<UserProfile, SessionError> {
        self.wait_until_restored().await;
        let mut profile = self.user().ok_or(SessionError::NotAuthenticated)?;

        let api = &self.inner.api;
        let body = &update;
        self.send_authorized(move |token| async move { api.update_user(token.as_ref(), body).await })
            .await?;

        profile.name = update.name.clone();
        self.inner.replace_profile(profile.clone()).await?;
        Ok(profile)
    }

    /// Upload a new avatar, then store the profile the server returns.
    pub async fn update_avatar(&self, avatar: Avatar) -> Result<UserProfile, SessionError> {
        self.wait_until_restored().await;
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }

        let api = &self.inner.api;
        let image = &avatar;
        let profile = self
            .send_authorized(move |token| async move { api.update_avatar(token.as_ref(), image).await })
            .await?;

        self.inner.replace_profile(profile.clone()).await?;
        Ok(profile)
    }

    /// Run `request` with the current bearer token.
    ///
    /// `request` gets the token to send. On a 401 the token is refreshed
    /// (sharing any refresh already in flight) and `request` is called once
    /// more with the new token. If the refresh fails the session is ended and
    /// the request's own error is returned.
    pub async fn send_authorized<T, R, Fut>(&self, request: R) -> Result<T, ApiError>
    where
        R: Fn(Option<Secret>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let inner = Arc::clone(&self.inner);
        self.inner
            .binding
            .execute(request, move || inner.refresh().boxed())
            .await
    }

    /// Authorized JSON request to any app endpoint.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ApiError> {
        let api = &self.inner.api;
        self.send_authorized(move |token| {
            let method = method.clone();
            async move { api.send_json(token.as_ref(), method, path, body).await }
        })
        .await
    }

    /// Authorized `GET` of any app endpoint.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(Method::GET, path, None).await
    }
}

impl<S: KeyValueStore + 'static> Drop for SessionManager<S> {
    fn drop(&mut self) {
        if let Some(task) = self.restore_task.lock().take() {
            task.abort();
        }
    }
}

impl<S: KeyValueStore + 'static> std::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.inner.machine.read().state.name())
            .field("binding", &self.inner.binding)
            .finish()
    }
}

impl<S: KeyValueStore + 'static> Inner<S> {
    fn generation(&self) -> u64 {
        self.machine.read().generation
    }

    async fn restore(&self) {
        info!("Restoring session from storage");
        let mut failures = Vec::new();

        let credential = match self.credentials.get_credential().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Failed to read stored credential: {}", e);
                failures.push(format!("credential: {}", e));
                None
            }
        };
        let user = match self.credentials.get_user().await {
            Ok(user) => user,
            Err(e) => {
                warn!("Failed to read stored user: {}", e);
                failures.push(format!("user: {}", e));
                None
            }
        };

        let session = match (user, credential) {
            (Some(user), Some(credential)) => Some(Session::new(user, credential)),
            (None, None) if failures.is_empty() => None,
            (user, credential) => {
                warn!(
                    "Discarding unusable stored session (user: {}, credential: {})",
                    user.is_some(),
                    credential.is_some()
                );
                if let Err(e) = self.credentials.clear().await {
                    warn!("Failed to remove unusable session: {}", e);
                }
                None
            }
        };

        let _delivery = self.delivery.lock();
        let authenticated = self.settle(session);

        if !failures.is_empty() {
            let message = failures.join("; ");
            *self.last_restore_error.lock() = Some(message.clone());
            self.observers.notify(&SessionEvent::RestoreFailed { message });
        }

        self.restored.send_replace(true);
        info!(
            "Session restore finished ({})",
            if authenticated { "authenticated" } else { "unauthenticated" }
        );
        self.observers.notify(&SessionEvent::Restored { authenticated });
    }

    /// Leave `Restoring` for the given outcome. Does nothing once settled.
    fn settle(&self, session: Option<Session>) -> bool {
        let mut machine = self.machine.write();
        if !matches!(machine.state, SessionState::Restoring) {
            return false;
        }
        match session {
            Some(session) => {
                self.binding.bind(&session.credential.access_token);
                machine.state = SessionState::Authenticated(session);
                true
            }
            None => {
                machine.state = SessionState::Unauthenticated;
                false
            }
        }
    }

    async fn commit_sign_in(&self, generation: u64, grant: SessionGrant) -> Result<(), SessionError> {
        let SessionGrant { user, credential } = grant;
        let _commit = self.commit.lock().await;

        if self.generation() != generation {
            info!("Discarding sign-in: session ended while it was in flight");
            return Err(SessionError::Superseded);
        }

        let persisted = match self.credentials.save_credential(&credential).await {
            Ok(()) => self.credentials.save_user(&user).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            warn!("Failed to persist session, rolling back: {}", e);
            if let Err(cleanup) = self.credentials.clear().await {
                warn!("Failed to clean up after persist failure: {}", cleanup);
            }
            self.leave(None, SignOutReason::StorageFailed);
            return Err(e.into());
        }

        let _delivery = self.delivery.lock();
        {
            let mut machine = self.machine.write();
            if machine.generation != generation {
                info!("Discarding sign-in: session ended while it was being saved");
                return Err(SessionError::Superseded);
            }
            machine.generation += 1;
            self.binding.bind(&credential.access_token);
            machine.state = SessionState::Authenticated(Session::new(user.clone(), credential));
        }

        info!("Signed in as user {}", user.id);
        self.observers.notify(&SessionEvent::SignedIn(user));
        Ok(())
    }

    async fn replace_profile(&self, profile: UserProfile) -> Result<(), SessionError> {
        let generation = {
            let machine = self.machine.read();
            let session = machine.state.session().ok_or(SessionError::NotAuthenticated)?;
            if session.user.id != profile.id {
                return Err(SessionError::ProfileMismatch {
                    given: profile.id.to_string(),
                    current: session.user.id.to_string(),
                });
            }
            machine.generation
        };

        let _commit = self.commit.lock().await;
        if self.generation() != generation {
            return Err(SessionError::Superseded);
        }
        self.credentials.save_user(&profile).await?;

        let _delivery = self.delivery.lock();
        {
            let mut machine = self.machine.write();
            if machine.generation != generation {
                return Err(SessionError::Superseded);
            }
            if let SessionState::Authenticated(session) = &mut machine.state {
                session.user = profile.clone();
            }
        }

        info!("Updated profile for user {}", profile.id);
        self.observers.notify(&SessionEvent::ProfileUpdated(profile));
        Ok(())
    }

    /// Move to `Unauthenticated` in memory.
    ///
    /// With `expected_generation`, only if no other sign-out happened since.
    /// Returns `false` if skipped for that reason.
    fn leave(&self, expected_generation: Option<u64>, reason: SignOutReason) -> bool {
        let _delivery = self.delivery.lock();
        let was_authenticated = {
            let mut machine = self.machine.write();
            if expected_generation.is_some_and(|g| g != machine.generation) {
                return false;
            }
            machine.generation += 1;
            let was = machine.state.session().is_some();
            machine.state = SessionState::Unauthenticated;
            self.binding.clear();
            was
        };

        if was_authenticated {
            info!("Session ended ({:?})", reason);
            self.observers.notify(&SessionEvent::SignedOut { reason });
        }
        true
    }

    /// Leave the session and remove both stored records.
    async fn end_session(&self, expected_generation: Option<u64>, reason: SignOutReason) {
        if !self.leave(expected_generation, reason) {
            return;
        }

        let _commit = self.commit.lock().await;
        if let Err(e) = self.credentials.clear().await {
            warn!("Failed to remove stored session: {}", e);
        }
    }

    /// Trade the refresh token for a new credential.
    ///
    /// Runs at most once at a time (see [`AuthBinding::refresh_once`]). Any
    /// failure ends the session.
    async fn refresh(self: Arc<Self>) -> Result<Secret, RefreshError> {
        let (generation, refresh_token) = {
            let machine = self.machine.read();
            match machine.state.session() {
                Some(session) => (machine.generation, session.credential.refresh_token.clone()),
                None => return Err(RefreshError::new("no active session")),
            }
        };

        info!("Refreshing access token");
        let credential = match self.api.refresh_session(&refresh_token).await {
            Ok(credential) => credential,
            Err(e) => {
                error!("Token refresh failed: {}", e);
                self.end_session(Some(generation), SignOutReason::RefreshFailed).await;
                return Err(RefreshError::new(e.to_string()));
            }
        };

        let saved = {
            let _commit = self.commit.lock().await;
            if self.generation() != generation {
                return Err(RefreshError::new("session ended during refresh"));
            }
            match self.credentials.save_credential(&credential).await {
                Ok(()) => {
                    let _delivery = self.delivery.lock();
                    let installed = self.install_credential(generation, &credential);
                    if installed.is_ok() {
                        info!("Access token refreshed");
                        self.observers.notify(&SessionEvent::TokenRefreshed);
                    }
                    installed
                }
                Err(e) => Err(RefreshError::new(format!("failed to save refreshed credential: {}", e))),
            }
        };

        match saved {
            Ok(token) => Ok(token),
            Err(e) => {
                error!("{}", e);
                self.end_session(Some(generation), SignOutReason::RefreshFailed).await;
                Err(e)
            }
        }
    }

    fn install_credential(&self, generation: u64, credential: &Credential) -> Result<Secret, RefreshError> {
        let mut machine = self.machine.write();
        if machine.generation != generation {
            return Err(RefreshError::new("session ended during refresh"));
        }
        match &mut machine.state {
            SessionState::Authenticated(session) => {
                session.credential = credential.clone();
                session.refreshed_at = Some(chrono::Utc::now());
                self.binding.bind(&credential.access_token);
                Ok(credential.access_token.clone())
            }
            _ => Err(RefreshError::new("no active session")),
        }
    }
}
