//! Credential and result-field encryption (§4.J).
//!
//! `spec.md` treats `encrypt(field) -> ciphertext` / `decrypt` as an external
//! collaborator contract; this module supplies the concrete implementation
//! every other component calls through `CredCrypto`. Connection descriptor
//! secrets (password, SSH private key/passphrase, Google OAuth tokens) and a
//! query's `executionResult` blob are encrypted at rest with this wrapper.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{NeoBaseError, Result};

const NONCE_LEN: usize = 12;

/// Narrow interface for field-level encryption, used by persistence and the
/// query pipeline. Kept as a trait so tests can substitute a no-op stub.
pub trait CredCrypto: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// AES-256-GCM implementation keyed from the `AES key material` startup
/// secret. The ciphertext wire format is `base64(nonce || ciphertext)`.
pub struct AesFieldCrypto {
    cipher: Aes256Gcm,
}

impl AesFieldCrypto {
    /// Builds the cipher from a 32-byte key. Callers typically derive the
    /// key from the `AES_KEY` environment variable at startup.
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Derives a 32-byte key from an arbitrary-length passphrase via SHA-256,
    /// so operators can configure `AES_KEY` as a plain string rather than
    /// hex/base64-encoded key material.
    pub fn from_passphrase(passphrase: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        let digest = hasher.finalize();
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&digest);
        Self::new(&key_bytes)
    }
}

impl CredCrypto for AesFieldCrypto {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| NeoBaseError::fatal(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let raw = STANDARD
            .decode(ciphertext)
            .map_err(|e| NeoBaseError::fatal(format!("invalid ciphertext encoding: {e}")))?;

        if raw.len() < NONCE_LEN {
            return Err(NeoBaseError::fatal("ciphertext too short"));
        }
        let (nonce_bytes, body) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, body)
            .map_err(|e| NeoBaseError::fatal(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| NeoBaseError::fatal(format!("decrypted payload not utf8: {e}")))
    }
}

/// No-op crypto for tests that don't care about at-rest confidentiality.
#[derive(Default)]
pub struct PlaintextCrypto;

impl CredCrypto for PlaintextCrypto {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = AesFieldCrypto::from_passphrase("test-aes-key-material");
        let plaintext = "super-secret-password";
        let ciphertext = crypto.encrypt(plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let decrypted = crypto.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_is_nondeterministic() {
        let crypto = AesFieldCrypto::from_passphrase("test-aes-key-material");
        let a = crypto.encrypt("same-input").unwrap();
        let b = crypto.encrypt("same-input").unwrap();
        assert_ne!(a, b, "random nonce should produce distinct ciphertexts");
    }

    #[test]
    fn test_decrypt_rejects_truncated_ciphertext() {
        let crypto = AesFieldCrypto::from_passphrase("key");
        assert!(crypto.decrypt("YWJj").is_err());
    }

    #[test]
    fn test_plaintext_crypto_is_identity() {
        let crypto = PlaintextCrypto;
        assert_eq!(crypto.encrypt("x").unwrap(), "x");
        assert_eq!(crypto.decrypt("x").unwrap(), "x");
    }
}
