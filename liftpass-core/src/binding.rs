//! Bearer-token binding for outgoing requests.
//!
//! [`AuthBinding`] holds the access token currently bound to the HTTP layer
//! and nothing else about the session. Requests run through
//! [`AuthBinding::execute`], which reads the token at call time, and on an
//! authorization failure:
//!
//! 1. joins the refresh already in flight, or starts one if there is none,
//! 2. retries the request once with the refreshed token,
//! 3. returns the request's original error if the refresh fails.
//!
//! At most one refresh runs at a time. The pending refresh is a
//! [`Shared`] future parked in the binding until it resolves; every request
//! that fails while it is pending awaits that same future.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::store::Secret;

/// Why a silent refresh did not produce a new token.
#[derive(Debug, Clone, Error)]
#[error("token refresh failed: {message}")]
pub struct RefreshError {
    pub message: String,
}

impl RefreshError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A refresh attempt resolving to the new access token.
pub type RefreshFuture = BoxFuture<'static, Result<Secret, RefreshError>>;

type InFlight = Shared<RefreshFuture>;

/// Current bearer token plus the single-flight refresh latch.
#[derive(Default)]
pub struct AuthBinding {
    token: RwLock<Option<Secret>>,
    in_flight: Mutex<Option<InFlight>>,
}

impl AuthBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `token` to every subsequent request.
    pub fn bind(&self, token: &Secret) {
        *self.token.write() = Some(token.clone());
    }

    /// Stop attaching a token.
    pub fn clear(&self) {
        *self.token.write() = None;
    }

    pub fn current_token(&self) -> Option<Secret> {
        self.token.read().clone()
    }

    /// The `Authorization` header value requests currently carry.
    pub fn authorization_header(&self) -> Option<String> {
        self.token
            .read()
            .as_ref()
            .map(|token| format!("Bearer {}", token.expose()))
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Await the pending refresh, or start one with `start` if none is pending.
    ///
    /// `start` is only called when this caller is the one starting the
    /// refresh. The latch is released once the refresh resolves, success or
    /// failure, so the next authorization failure starts a fresh attempt.
    pub async fn refresh_once<F>(&self, start: F) -> Result<Secret, RefreshError>
    where
        F: FnOnce() -> RefreshFuture,
    {
        let flight = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining token refresh already in flight");
                    pending.clone()
                }
                None => {
                    let pending = start().shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let result = flight.clone().await;

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|pending| pending.ptr_eq(&flight)) {
            *slot = None;
        }
        result
    }

    /// Run `request` with the bound token, refreshing once on a 401.
    ///
    /// `request` receives the token to send (or `None` when nothing is
    /// bound) and may be called twice: once with the current token and, after
    /// a successful refresh, once more with the new one. `start_refresh` is
    /// only called if this request has to start the refresh itself.
    ///
    /// A 401 on a request sent without a token, or after the session was
    /// cleared, is returned as is. If the token changed while the request was
    /// in flight, the request is retried with the new token without
    /// refreshing again.
    pub async fn execute<T, R, Fut, F>(&self, request: R, start_refresh: F) -> Result<T, ApiError>
    where
        R: Fn(Option<Secret>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        F: FnOnce() -> RefreshFuture,
    {
        let sent_with = self.current_token();
        let original = match request(sent_with.clone()).await {
            Err(e) if e.is_unauthorized() => e,
            other => return other,
        };

        let Some(sent_with) = sent_with else {
            return Err(original);
        };

        let retry_with = match self.current_token() {
            None => {
                debug!("Authorization failed after the session was cleared");
                return Err(original);
            }
            Some(current) if current != sent_with => {
                debug!("Token changed while the request was in flight; retrying");
                current
            }
            Some(_) => match self.refresh_once(start_refresh).await {
                Ok(token) => token,
                Err(e) => {
                    warn!("Giving up on request after failed refresh: {}", e);
                    return Err(original);
                }
            },
        };

        request(Some(retry_with)).await
    }
}

impl std::fmt::Debug for AuthBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBinding")
            .field("bound", &self.token.read().is_some())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unauthorized() -> ApiError {
        ApiError::Unauthorized { message: None }
    }

    /// Accepts only `valid`, counting calls.
    fn endpoint(valid: &'static str, calls: Arc<AtomicUsize>) -> impl Fn(Option<Secret>) -> BoxFuture<'static, Result<&'static str, ApiError>> {
        move |token: Option<Secret>| {
            calls.fetch_add(1, Ordering::SeqCst);
            let ok = token.as_ref().map(Secret::expose) == Some(valid);
            async move { if ok { Ok("ok") } else { Err(unauthorized()) } }.boxed()
        }
    }

    #[tokio::test]
    async fn test_header_follows_bound_token() {
        let binding = AuthBinding::new();
        assert_eq!(binding.authorization_header(), None);

        binding.bind(&Secret::new("a1"));
        assert_eq!(binding.authorization_header().as_deref(), Some("Bearer a1"));

        binding.clear();
        assert_eq!(binding.authorization_header(), None);
    }

    #[tokio::test]
    async fn test_success_passes_through_without_refresh() {
        let binding = AuthBinding::new();
        binding.bind(&Secret::new("a1"));
        let calls = Arc::new(AtomicUsize::new(0));

        let result = binding
            .execute(endpoint("a1", calls.clone()), || panic!("refresh must not start"))
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_auth_errors_pass_through() {
        let binding = AuthBinding::new();
        binding.bind(&Secret::new("a1"));

        let result: Result<(), ApiError> = binding
            .execute(
                |_| async { Err(ApiError::Rejected { status: 500, message: None }) },
                || panic!("refresh must not start"),
            )
            .await;

        assert!(matches!(result, Err(ApiError::Rejected { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_refresh_then_retry_once() {
        let binding = Arc::new(AuthBinding::new());
        binding.bind(&Secret::new("old"));
        let calls = Arc::new(AtomicUsize::new(0));

        let rebinding = binding.clone();
        let result = binding
            .execute(endpoint("new", calls.clone()), move || {
                async move {
                    let token = Secret::new("new");
                    rebinding.bind(&token);
                    Ok(token)
                }
                .boxed()
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!binding.is_refreshing());
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_original_error() {
        let binding = AuthBinding::new();
        binding.bind(&Secret::new("old"));
        let calls = Arc::new(AtomicUsize::new(0));

        let result = binding
            .execute(endpoint("new", calls.clone()), || {
                async { Err(RefreshError::new("refresh token revoked")) }.boxed()
            })
            .await;

        assert!(matches!(result, Err(ApiError::Unauthorized { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!binding.is_refreshing());
    }

    #[tokio::test]
    async fn test_unbound_request_is_not_refreshed() {
        let binding = AuthBinding::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = binding
            .execute(endpoint("a1", calls.clone()), || panic!("refresh must not start"))
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let binding = Arc::new(AuthBinding::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let gate = gate.shared();

        let start = {
            let starts = starts.clone();
            move || -> RefreshFuture {
                starts.fetch_add(1, Ordering::SeqCst);
                let gate = gate.clone();
                async move {
                    let _ = gate.await;
                    Ok(Secret::new("t3"))
                }
                .boxed()
            }
        };

        let first = tokio::spawn({
            let binding = binding.clone();
            let start = start.clone();
            async move { binding.refresh_once(start).await }
        });
        let second = tokio::spawn({
            let binding = binding.clone();
            let start = start.clone();
            async move { binding.refresh_once(start).await }
        });

        while !binding.is_refreshing() {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        release.send(()).unwrap();

        assert_eq!(first.await.unwrap().unwrap().expose(), "t3");
        assert_eq!(second.await.unwrap().unwrap().expose(), "t3");
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(!binding.is_refreshing());
    }
}
