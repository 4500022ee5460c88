//! At-rest Secret Encryption
//!
//! Provider credentials (Plaid access tokens, Breez node credentials) are
//! sealed with AES-256-GCM before they reach storage. The key is the SHA-256
//! digest of an operator-supplied secret; each ciphertext is stored as
//! base64 of `nonce || ciphertext`.

use std::fmt;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

const NONCE_LEN: usize = 12;

/// Environment variable holding the operator secret
pub const ENCRYPTION_KEY_VAR: &str = "PAIDIN_ENCRYPTION_KEY";

/// A sealed secret. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret(String);

impl EncryptedSecret {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedSecret(<redacted>)")
    }
}

/// Symmetric cipher for provider secrets
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    /// Derive the cipher key from an operator secret
    pub fn new(secret: &str) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(CoreError::Config("encryption secret is empty".into()));
        }
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Create from `PAIDIN_ENCRYPTION_KEY`
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var(ENCRYPTION_KEY_VAR)
            .map_err(|_| CoreError::Config(format!("{ENCRYPTION_KEY_VAR} not set")))?;
        Self::new(&secret)
    }

    pub fn seal(&self, plaintext: &str) -> Result<EncryptedSecret> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CoreError::Crypto("encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(EncryptedSecret(STANDARD.encode(sealed)))
    }

    pub fn open(&self, sealed: &EncryptedSecret) -> Result<String> {
        let bytes = STANDARD
            .decode(sealed.as_str())
            .map_err(|e| CoreError::Crypto(format!("malformed ciphertext: {e}")))?;
        if bytes.len() <= NONCE_LEN {
            return Err(CoreError::Crypto("ciphertext too short".into()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::Crypto("decryption failed".into()))?;

        String::from_utf8(plaintext).map_err(|e| CoreError::Crypto(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let secrets = SecretBox::new("operator-secret").unwrap();
        let sealed = secrets.seal("access-sandbox-123").unwrap();

        assert!(!sealed.as_str().contains("access-sandbox-123"));
        assert_eq!(secrets.open(&sealed).unwrap(), "access-sandbox-123");
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let secrets = SecretBox::new("operator-secret").unwrap();
        let a = secrets.seal("same").unwrap();
        let b = secrets.seal("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let sealed = SecretBox::new("key-one").unwrap().seal("token").unwrap();
        let other = SecretBox::new("key-two").unwrap();
        assert!(matches!(other.open(&sealed), Err(CoreError::Crypto(_))));
    }

    #[test]
    fn test_debug_is_redacted() {
        let sealed = SecretBox::new("k").unwrap().seal("token").unwrap();
        assert_eq!(format!("{sealed:?}"), "EncryptedSecret(<redacted>)");
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(SecretBox::new("  "), Err(CoreError::Config(_))));
    }
}
