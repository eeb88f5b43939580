//! Authentication token handling.
//!
//! This module provides:
//! - `TokenLifecycle`: token storage, legacy-slot migration and session teardown
//! - `claims`: unsigned JWT payload decoding and expiry checks
//!
//! Tokens are kept encrypted in the `secure` namespace. Older releases
//! left them under other names, sometimes in plain text; those are picked
//! up and moved on first read.

pub mod claims;
pub mod token;

pub use claims::{TokenClaims, TokenError, TokenValidation};
pub use token::{
    SessionEndReason, TokenLifecycle, TokenLocation, TokenRecord, AUTH_NAMESPACE, TOKEN_LOCATIONS,
};
