//! REST client for the liftpass server.
//!
//! [`ApiClient`] knows the endpoints and their wire shapes but nothing about
//! sessions: authenticated calls take the bearer token as an argument. The
//! token is supplied at call time by [`crate::binding::AuthBinding`].

mod client;
mod error;

pub use client::{ApiClient, ApiConfig, SessionGrant, MAX_AVATAR_BYTES};
pub use error::{ApiError, FALLBACK_MESSAGE};
