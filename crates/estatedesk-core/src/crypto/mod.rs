//! At-rest encoding for persisted values.
//!
//! This module provides:
//! - `Cipher`: the swappable encrypt/decrypt seam used by `EncodedStore`
//! - `XChaChaCipher`: the default XChaCha20-Poly1305 implementation
//! - `KeySource`: where the 256-bit key comes from (derived, keychain, fixed)
//!
//! The environment-derived key is obfuscation only: anyone who can run
//! code as the same user on the same host derives the same key. Use
//! `KeySource::Keyring` when stored values must stay confidential.

pub mod cipher;
pub mod key;

pub use cipher::{Cipher, XChaChaCipher};
pub use key::{KeySource, KEY_LEN};
