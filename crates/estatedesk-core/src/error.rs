use thiserror::Error;

/// Failures of the underlying key-value primitive.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage quota exceeded writing {key} ({requested} bytes, {available} available)")]
    QuotaExceeded {
        key: String,
        requested: usize,
        available: usize,
    },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid blob format: {0}")]
    InvalidFormat(String),
}

/// Errors surfaced by the core's write paths.
///
/// Read paths never return these: corrupt blobs and expired entries are
/// recovered locally and read as absent.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Value is not serializable: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No authenticated session")]
    NoSession,
}

pub type Result<T> = std::result::Result<T, CoreError>;
