//! REST access to the back office.
//!
//! Requests carry the bearer token from `TokenLifecycle`. A 401 response
//! ends the session through the same teardown path as logout.

pub mod client;
pub mod error;

pub use client::{ApiClient, CachedApi};
pub use error::ApiError;
