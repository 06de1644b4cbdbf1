//! Session states, events and snapshots.

use chrono::{DateTime, Utc};

use crate::model::{Credential, UserProfile};

/// A signed-in user together with the credential that proves it.
///
/// Both halves are always present; there is no partially authenticated
/// session.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: UserProfile,
    pub credential: Credential,
    pub signed_in_at: DateTime<Utc>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user: UserProfile, credential: Credential) -> Self {
        Self {
            user,
            credential,
            signed_in_at: Utc::now(),
            refreshed_at: None,
        }
    }
}

/// The session state machine.
///
/// `Restoring` is only ever the initial state; afterwards the machine moves
/// between `Unauthenticated` and `Authenticated` for the life of the process.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    Restoring,
    Unauthenticated,
    Authenticated(Session),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Restoring => "restoring",
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated(_) => "authenticated",
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The user asked to sign out.
    Requested,
    /// The credential expired and could not be refreshed.
    RefreshFailed,
    /// A sign-in could not be saved and was rolled back.
    StorageFailed,
}

/// Delivered to observers after every state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The launch restore finished.
    Restored { authenticated: bool },
    SignedIn(UserProfile),
    SignedOut { reason: SignOutReason },
    ProfileUpdated(UserProfile),
    TokenRefreshed,
    /// Stored session data could not be read at launch. The session starts
    /// signed out.
    RestoreFailed { message: String },
}

/// Read-only view of the session for callers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: &'static str,
    pub user: Option<UserProfile>,
    pub is_restoring: bool,
    pub signed_in_at: Option<DateTime<Utc>>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

impl From<&SessionState> for SessionSnapshot {
    fn from(state: &SessionState) -> Self {
        let session = state.session();
        Self {
            state: state.name(),
            user: session.map(|s| s.user.clone()),
            is_restoring: matches!(state, SessionState::Restoring),
            signed_in_at: session.map(|s| s.signed_in_at),
            refreshed_at: session.and_then(|s| s.refreshed_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_of_restoring() {
        let snapshot = SessionSnapshot::from(&SessionState::default());
        assert!(snapshot.is_restoring);
        assert!(!snapshot.is_authenticated());
        assert_eq!(snapshot.state, "restoring");
    }

    #[test]
    fn test_snapshot_of_authenticated() {
        let state = SessionState::Authenticated(Session::new(
            UserProfile::new("1", "Ana", "ana@example.com"),
            Credential::new("a1", "r1"),
        ));
        let snapshot = SessionSnapshot::from(&state);
        assert!(snapshot.is_authenticated());
        assert!(!snapshot.is_restoring);
        assert!(snapshot.signed_in_at.is_some());
        assert!(snapshot.refreshed_at.is_none());
    }
}
