use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::Rng;

use crate::error::CryptoError;

use super::key::KEY_LEN;

/// Blob prefix, bumped if the layout below ever changes
const BLOB_PREFIX: &str = "ed1:";

/// Nonce length for XChaCha20-Poly1305
const NONCE_LEN: usize = 24;

/// Reversible transform applied to serialized values before they are stored.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError>;

    fn decrypt(&self, blob: &str) -> Result<Vec<u8>, CryptoError>;
}

/// XChaCha20-Poly1305 with a random nonce per value.
///
/// Blob layout: `ed1:` + base64(nonce || ciphertext || tag). The AEAD tag
/// makes tampered or truncated blobs fail to decrypt instead of yielding
/// garbage.
pub struct XChaChaCipher {
    cipher: XChaCha20Poly1305,
}

impl XChaChaCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }
}

impl Cipher for XChaChaCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", BLOB_PREFIX, STANDARD.encode(raw)))
    }

    fn decrypt(&self, blob: &str) -> Result<Vec<u8>, CryptoError> {
        let body = blob
            .strip_prefix(BLOB_PREFIX)
            .ok_or_else(|| CryptoError::InvalidFormat("missing blob prefix".to_string()))?;

        let raw = STANDARD
            .decode(body)
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(CryptoError::InvalidFormat(format!(
                "blob too short ({} bytes)",
                raw.len()
            )));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = XChaChaCipher::new(&[7u8; KEY_LEN]);
        let blob = cipher.encrypt(b"{\"id\":1}").unwrap();

        assert!(blob.starts_with(BLOB_PREFIX));
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"{\"id\":1}");
    }

    #[test]
    fn test_same_plaintext_gives_different_blobs() {
        let cipher = XChaChaCipher::new(&[7u8; KEY_LEN]);
        let a = cipher.encrypt(b"token").unwrap();
        let b = cipher.encrypt(b"token").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = XChaChaCipher::new(&[1u8; KEY_LEN]).encrypt(b"secret").unwrap();
        let err = XChaChaCipher::new(&[2u8; KEY_LEN]).decrypt(&blob).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed(_)));
    }

    #[test]
    fn test_garbage_is_invalid_format() {
        let cipher = XChaChaCipher::new(&[1u8; KEY_LEN]);
        assert!(matches!(
            cipher.decrypt("plain-token").unwrap_err(),
            CryptoError::InvalidFormat(_)
        ));
        assert!(matches!(
            cipher.decrypt("ed1:!!!").unwrap_err(),
            CryptoError::InvalidFormat(_)
        ));
        assert!(matches!(
            cipher.decrypt("ed1:AAAA").unwrap_err(),
            CryptoError::InvalidFormat(_)
        ));
    }
}
