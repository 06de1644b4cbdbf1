//! Top-level error type for session operations.

use thiserror::Error;

use crate::api::{ApiError, FALLBACK_MESSAGE};
use crate::store::StoreError;

/// Error returned by [`SessionManager`](crate::SessionManager) operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation needs a signed-in user and there is none.
    #[error("no authenticated session")]
    NotAuthenticated,

    /// A profile for a different user was passed to a profile update.
    #[error("profile {given} does not belong to the signed-in user {current}")]
    ProfileMismatch { given: String, current: String },

    /// A sign-out happened while this operation was in flight; its result
    /// was discarded.
    #[error("session ended while the operation was in flight")]
    Superseded,

    /// The server or the network failed the request.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Persisting the session failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Api(e) => e.user_message(),
            SessionError::NotAuthenticated => "You need to sign in again.".to_string(),
            _ => FALLBACK_MESSAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_prefers_server_text() {
        let err = SessionError::from(ApiError::Rejected {
            status: 401,
            message: Some("Incorrect email or password.".to_string()),
        });
        assert_eq!(err.user_message(), "Incorrect email or password.");
    }

    #[test]
    fn test_user_message_fallback() {
        let err = SessionError::from(StoreError::BackendError {
            message: "disk full".to_string(),
        });
        assert_eq!(err.user_message(), FALLBACK_MESSAGE);
    }
}
