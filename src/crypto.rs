//! Secret encryption using AES-256-GCM
//!
//! Encrypts secrets stored at rest (TOTP seeds) with additional
//! authenticated data binding each ciphertext to its owner, so a value copied
//! onto another row fails to decrypt.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("invalid key length: expected 32 bytes")]
    InvalidKeyLength,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength);
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Derive a key from another secret. Only used for local and test
    /// profiles that have no dedicated key configured.
    pub fn derive_from(secret: &str) -> Self {
        ZeroizingKey(Sha256::digest(secret.as_bytes()).to_vec())
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // version || nonce || ciphertext+tag
    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }
    if ciphertext[0] != VERSION_ENCRYPTED || ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];
    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

fn totp_aad(user_id: Uuid) -> Vec<u8> {
    format!("totp:{user_id}").into_bytes()
}

/// Encrypt a user's TOTP secret into a base64 column value.
pub fn encrypt_totp_secret(
    key: &CryptoKey,
    user_id: Uuid,
    secret: &str,
) -> Result<String, CryptoError> {
    let sealed = encrypt_bytes(key, &totp_aad(user_id), secret.as_bytes())?;
    Ok(STANDARD.encode(sealed))
}

pub fn decrypt_totp_secret(
    key: &CryptoKey,
    user_id: Uuid,
    stored: &str,
) -> Result<String, CryptoError> {
    let sealed = STANDARD
        .decode(stored)
        .map_err(|_| CryptoError::InvalidFormat)?;
    let mut plaintext = decrypt_bytes(key, &totp_aad(user_id), &sealed)?;
    let secret = String::from_utf8(plaintext.clone()).map_err(|_| CryptoError::InvalidFormat);
    plaintext.zeroize();
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        let sealed = encrypt_bytes(&key, b"aad", b"hello").unwrap();
        assert_eq!(decrypt_bytes(&key, b"aad", &sealed).unwrap(), b"hello");
    }

    #[test]
    fn different_aad_fails() {
        let key = test_key();
        let sealed = encrypt_bytes(&key, b"one", b"hello").unwrap();
        assert!(matches!(
            decrypt_bytes(&key, b"two", &sealed),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn modified_ciphertext_fails() {
        let key = test_key();
        let mut sealed = encrypt_bytes(&key, b"aad", b"hello").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(decrypt_bytes(&key, b"aad", &sealed).is_err());
    }

    #[test]
    fn nonce_uniqueness() {
        let key = test_key();
        let a = encrypt_bytes(&key, b"aad", b"same").unwrap();
        let b = encrypt_bytes(&key, b"aad", b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unversioned_or_short_payloads_are_rejected() {
        let key = test_key();
        assert!(matches!(
            decrypt_bytes(&key, b"aad", b"plain"),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[VERSION_ENCRYPTED, 1, 2]),
            Err(CryptoError::InvalidFormat)
        ));
        assert!(matches!(
            decrypt_bytes(&key, b"aad", &[]),
            Err(CryptoError::EmptyCiphertext)
        ));
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength)
        ));
    }

    #[test]
    fn totp_secret_is_bound_to_its_user() {
        let key = test_key();
        let owner = Uuid::new_v4();
        let stored = encrypt_totp_secret(&key, owner, "JBSWY3DPEHPK3PXP").unwrap();

        assert_eq!(
            decrypt_totp_secret(&key, owner, &stored).unwrap(),
            "JBSWY3DPEHPK3PXP"
        );
        assert!(decrypt_totp_secret(&key, Uuid::new_v4(), &stored).is_err());
    }
}
