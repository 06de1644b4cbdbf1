//! Liftpass CLI library.
//!
//! Exposes the configuration layer so it can be tested and reused.

pub mod config;
