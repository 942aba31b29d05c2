//! AES-256-GCM codec for payment tokens at rest.
//!
//! Stored form is `base64(nonce || ciphertext || tag)` with a fresh 96-bit nonce
//! per call, so encrypting the same token twice never yields the same string.
//! The key is SHA-256 of the configured secret. A missing or short secret does
//! not stop the process from starting; it surfaces as a `ConfigurationError` the
//! first time a token is actually encrypted or decrypted.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::EncryptionConfig;
use crate::errors::ServiceError;

/// Minimum secret size in bytes (256 bits).
pub const MIN_SECRET_BYTES: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct TokenCipher {
    cipher: Result<Arc<Aes256Gcm>, String>,
}

impl TokenCipher {
    pub fn from_config(config: &EncryptionConfig) -> Self {
        Self::new(config.secret_key.as_deref())
    }

    pub fn new(secret: Option<&str>) -> Self {
        let cipher = match secret {
            None => Err("no encryption secret configured".to_string()),
            Some(secret) => {
                let material = secret_bytes(secret);
                if material.len() < MIN_SECRET_BYTES {
                    Err(format!(
                        "encryption secret must be at least {} bytes, got {}",
                        MIN_SECRET_BYTES,
                        material.len()
                    ))
                } else {
                    let key = Sha256::digest(&material);
                    Aes256Gcm::new_from_slice(&key)
                        .map(Arc::new)
                        .map_err(|e| format!("failed to initialise cipher: {}", e))
                }
            }
        };
        Self { cipher }
    }

    /// Whether a usable key is configured.
    pub fn is_configured(&self) -> bool {
        self.cipher.is_ok()
    }

    fn cipher(&self) -> Result<&Aes256Gcm, ServiceError> {
        self.cipher
            .as_deref()
            .map_err(|reason| ServiceError::ConfigurationError(reason.clone()))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, ServiceError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| ServiceError::Unexpected(format!("encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, ServiceError> {
        if encoded.is_empty() {
            return Ok(String::new());
        }
        let cipher = self.cipher()?;
        let data = BASE64
            .decode(encoded)
            .map_err(|_| ServiceError::DecryptionFailed("stored value is not base64".into()))?;
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(ServiceError::DecryptionFailed(
                "stored value is too short".into(),
            ));
        }

        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| ServiceError::DecryptionFailed("authentication tag mismatch".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| ServiceError::DecryptionFailed("plaintext is not UTF-8".into()))
    }

    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<Option<String>, ServiceError> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    pub fn decrypt_optional(&self, encoded: Option<&str>) -> Result<Option<String>, ServiceError> {
        encoded.map(|e| self.decrypt(e)).transpose()
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher")
            .field("configured", &self.is_configured())
            .finish()
    }
}

// Base64 secrets are used decoded when they carry enough material; anything
// else is taken byte-for-byte.
fn secret_bytes(secret: &str) -> Vec<u8> {
    match BASE64.decode(secret.trim()) {
        Ok(decoded) if decoded.len() >= MIN_SECRET_BYTES => decoded,
        _ => secret.as_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "an-adequately-long-secret-for-tests-0123456789";

    #[test]
    fn round_trip() {
        let codec = TokenCipher::new(Some(SECRET));
        let encrypted = codec.encrypt("tok_abc123").unwrap();
        assert_ne!(encrypted, "tok_abc123");
        assert_eq!(codec.decrypt(&encrypted).unwrap(), "tok_abc123");
    }

    #[test]
    fn ciphertext_is_not_deterministic() {
        let codec = TokenCipher::new(Some(SECRET));
        let a = codec.encrypt("tok_same").unwrap();
        let b = codec.encrypt("tok_same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampering_is_detected() {
        let codec = TokenCipher::new(Some(SECRET));
        let encrypted = codec.encrypt("tok_abc123").unwrap();
        let mut raw = BASE64.decode(&encrypted).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);
        assert_matches!(codec.decrypt(&tampered), Err(ServiceError::DecryptionFailed(_)));
        assert_matches!(codec.decrypt("not base64!"), Err(ServiceError::DecryptionFailed(_)));
    }

    #[test]
    fn other_key_cannot_decrypt() {
        let encrypted = TokenCipher::new(Some(SECRET)).encrypt("tok_abc").unwrap();
        let other = TokenCipher::new(Some("a-completely-different-secret-of-enough-length"));
        assert_matches!(other.decrypt(&encrypted), Err(ServiceError::DecryptionFailed(_)));
    }

    #[test]
    fn empty_passes_through() {
        let codec = TokenCipher::new(Some(SECRET));
        assert_eq!(codec.encrypt("").unwrap(), "");
        assert_eq!(codec.decrypt("").unwrap(), "");
        assert_eq!(codec.encrypt_optional(None).unwrap(), None);
    }

    #[test]
    fn missing_or_short_secret_fails_on_use() {
        let missing = TokenCipher::new(None);
        assert!(!missing.is_configured());
        assert_matches!(missing.encrypt("tok"), Err(ServiceError::ConfigurationError(_)));

        let short = TokenCipher::new(Some("too-short"));
        assert_matches!(short.decrypt("AAAA"), Err(ServiceError::ConfigurationError(_)));
    }

    #[test]
    fn base64_secret_is_decoded() {
        let raw = [7u8; 32];
        let encoded = BASE64.encode(raw);
        let codec = TokenCipher::new(Some(&encoded));
        assert!(codec.is_configured());
        let encrypted = codec.encrypt("tok_x").unwrap();
        assert_eq!(codec.decrypt(&encrypted).unwrap(), "tok_x");
    }
}
