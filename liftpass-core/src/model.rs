//! Domain model types for liftpass.
//!
//! This module defines the core types used throughout liftpass:
//! - [`UserId`] - Server-assigned identifier for a user
//! - [`UserProfile`] - The signed-in user's public profile
//! - [`Credential`] - Opaque access/refresh token pair
//! - [`NewAccount`] - Sign-up request body
//! - [`ProfileUpdate`] - Profile edit request body
//! - [`Avatar`] - Image payload for avatar uploads

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::store::Secret;

/// Identifier for a user, as assigned by the server.
///
/// The server may send ids as JSON strings or numbers; both are accepted
/// and kept as strings.
///
/// # Examples
///
/// ```
/// use liftpass_core::UserId;
///
/// let id = UserId::new("1");
/// assert_eq!(id.as_str(), "1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UserId(String);

impl UserId {
    /// Create a new user ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the user ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is blank.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

/// The authenticated user's profile.
///
/// Unknown fields sent by the server are ignored, so new fields can be
/// added to the stored record without breaking older clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Server-assigned identifier.
    pub id: UserId,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Sign-in email.
    #[serde(default)]
    pub email: String,

    /// Path of the avatar image on the server, if one was uploaded.
    #[serde(rename = "avatar", default, skip_serializing_if = "Option::is_none")]
    pub avatar_path: Option<String>,
}

impl UserProfile {
    /// Create a profile without an avatar.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            avatar_path: None,
        }
    }

    /// Attach an avatar path.
    pub fn with_avatar(mut self, avatar_path: impl Into<String>) -> Self {
        self.avatar_path = Some(avatar_path.into());
        self
    }

    /// A profile without an id counts as no profile at all.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

/// An opaque access/refresh token pair issued by the server.
///
/// Nothing about the tokens is validated locally; only emptiness is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token attached to outgoing requests.
    #[serde(rename = "token")]
    pub access_token: Secret,

    /// Token exchanged for a fresh pair when the access token is rejected.
    pub refresh_token: Secret,
}

impl Credential {
    /// Create a credential from raw token strings.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
        }
    }

    /// A credential missing either token counts as no credential at all.
    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty() || self.refresh_token.is_empty()
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose())
    }
}

/// Request body for creating an account.
#[derive(Debug, Clone, Serialize)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password: Secret,
}

impl NewAccount {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: Secret::new(password),
        }
    }
}

/// Request body for editing the signed-in user's profile.
///
/// Changing the password requires the current one in `old_password`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_password: Option<Secret>,
}

impl ProfileUpdate {
    /// Rename without touching the password.
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Also change the password.
    pub fn with_password(
        mut self,
        old_password: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.old_password = Some(Secret::new(old_password));
        self.password = Some(Secret::new(password));
        self
    }
}

/// An image to upload as the user's avatar.
#[derive(Debug, Clone)]
pub struct Avatar {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Avatar {
    /// Build an avatar, guessing the MIME type from the file extension.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let mime_type = match extension.as_str() {
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "heic" => "image/heic",
            _ => "image/jpeg",
        };

        Self {
            file_name,
            mime_type: mime_type.to_string(),
            bytes,
        }
    }
}
