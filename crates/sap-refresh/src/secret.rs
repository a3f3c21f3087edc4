//! Credentials at rest: AES-256-GCM tokens keyed from the environment.
//!
//! A token is standard base64 of `nonce (12 bytes) || ciphertext || tag`.
//! The key is 32 random bytes, base64 encoded, in the `SAP_KEY` variable.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use zeroize::Zeroizing;

use crate::error::{RefreshError, Result};

pub const KEY_ENV_VAR: &str = "SAP_KEY";

const NONCE_LEN: usize = 12;

/// Symmetric codec for configuration secrets.
#[derive(Clone)]
pub struct SecretCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCodec").field("key", &"[REDACTED]").finish()
    }
}

impl SecretCodec {
    /// Build a codec from the key in [`KEY_ENV_VAR`].
    pub fn from_env() -> Result<Self> {
        let encoded = Zeroizing::new(std::env::var(KEY_ENV_VAR).map_err(|_| {
            RefreshError::Crypto(format!("environment variable {KEY_ENV_VAR} is not set"))
        })?);
        Self::from_base64_key(&encoded)
    }

    /// Build a codec from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let key = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| RefreshError::Crypto(format!("key is not valid base64: {e}")))?,
        );
        Self::from_key_bytes(&key)
    }

    pub fn from_key_bytes(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(RefreshError::Crypto(
                "key must be exactly 32 bytes".to_string(),
            ));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        })
    }

    /// A fresh random key, base64 encoded, suitable for [`KEY_ENV_VAR`].
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        BASE64.encode(key)
    }

    pub fn encode(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| RefreshError::Crypto(format!("encryption failed: {e}")))?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(token))
    }

    /// Decrypt a token. The plaintext is wiped from memory when dropped.
    pub fn decode(&self, token: &str) -> Result<Zeroizing<String>> {
        let raw = BASE64
            .decode(token.trim())
            .map_err(|_| RefreshError::Crypto("token is not valid base64".to_string()))?;
        if raw.len() <= NONCE_LEN {
            return Err(RefreshError::Crypto("token is truncated".to_string()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| {
                    RefreshError::Crypto("token was tampered with or uses another key".to_string())
                })?,
        );
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| RefreshError::Crypto("decrypted secret is not UTF-8".to_string()))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}
