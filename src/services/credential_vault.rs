use std::fs;
use std::path::Path;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use rand::RngCore;
use tracing::{info, warn};

const NONCE_SIZE: usize = 12; // AES-GCM standard nonce size
const KEY_ENV_VAR: &str = "OUTFLOW_ENCRYPTION_KEY";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("Encryption failed: {0}")]
    Encryption(String),
    #[error("Decryption failed: {0}")]
    Decryption(String),
    #[error("Failed to persist encryption key: {0}")]
    KeyPersistence(#[from] std::io::Error),
}

/// Seals and opens per-account session secrets with AES-256-GCM. A fresh
/// random nonce is generated per call and prefixed to the ciphertext, so
/// decryption is self-describing. There is no key rotation: data sealed
/// under a previous key is permanently unreadable and the remedy is
/// re-adding the account.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    pub fn from_key_hex(key_hex: &str) -> Result<Self, VaultError> {
        let key_bytes = hex::decode(key_hex).map_err(|e| VaultError::InvalidKey(format!("invalid hex: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(VaultError::InvalidKey(
                "encryption key must be 32 bytes (256 bits) long".to_string(),
            ));
        }
        let cipher = Aes256Gcm::new(key_bytes.as_slice().into());
        Ok(CredentialVault { cipher })
    }

    /// Resolves the key from `OUTFLOW_ENCRYPTION_KEY`, or generates a new one
    /// and appends it to `env_file` so the next start reuses it. Operators
    /// must treat loss of that key as loss of every sealed credential.
    pub fn from_env_or_generate(env_file: &Path) -> Result<Self, VaultError> {
        if let Ok(key_hex) = std::env::var(KEY_ENV_VAR) {
            info!("Using {} from environment", KEY_ENV_VAR);
            return Self::from_key_hex(&key_hex);
        }

        warn!("{} not found in environment, generating a new key", KEY_ENV_VAR);
        let key_hex = generate_key_into(env_file)?;
        warn!(file = %env_file.display(), "Generated encryption key persisted; back this file up");
        Self::from_key_hex(&key_hex)
    }

    pub fn seal(&self, plain_text: &str) -> Result<String, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain_text.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);

        Ok(hex::encode(result))
    }

    pub fn open(&self, cipher_hex: &str) -> Result<String, VaultError> {
        let encrypted_data =
            hex::decode(cipher_hex).map_err(|e| VaultError::Decryption(format!("invalid hex ciphertext: {e}")))?;
        if encrypted_data.len() < NONCE_SIZE {
            return Err(VaultError::Decryption(
                "ciphertext is too short to contain a nonce".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let decrypted_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| VaultError::Decryption(e.to_string()))?;

        String::from_utf8(decrypted_bytes)
            .map_err(|e| VaultError::Decryption(format!("invalid UTF-8 sequence: {e}")))
    }
}

/// Generates a fresh 256-bit key and appends it to `env_file`. If the file
/// already carries a key, that one is returned instead, so stored
/// credentials sealed under it stay readable.
fn generate_key_into(env_file: &Path) -> Result<String, VaultError> {
    let mut content = if env_file.exists() {
        fs::read_to_string(env_file)?
    } else {
        String::new()
    };

    for line in content.lines() {
        if let Some(existing) = line.strip_prefix(&format!("{KEY_ENV_VAR}=")) {
            return Ok(existing.trim().to_string());
        }
    }

    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    let key_hex = hex::encode(key);

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&format!("{KEY_ENV_VAR}={key_hex}\n"));
    fs::write(env_file, content)?;

    Ok(key_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_seal_open_round_trip() {
        let vault = CredentialVault::from_key_hex(KEY_HEX).unwrap();
        let plain_text = r#"{"auth_token":"abc123","ct0":"def456"}"#;

        let sealed = vault.seal(plain_text).unwrap();
        let opened = vault.open(&sealed).unwrap();

        assert_ne!(plain_text, sealed);
        assert_eq!(plain_text, opened);
    }

    #[test]
    fn test_seal_is_randomized() {
        let vault = CredentialVault::from_key_hex(KEY_HEX).unwrap();
        let a = vault.seal("same input").unwrap();
        let b = vault.seal("same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let other_key = "f1e1d1c1b1a191817161514131211101f0e0d0c0b0a090807060504030201000";
        let vault = CredentialVault::from_key_hex(KEY_HEX).unwrap();
        let other = CredentialVault::from_key_hex(other_key).unwrap();

        let sealed = vault.seal("another secret").unwrap();
        let result = other.open(&sealed);

        assert!(matches!(result, Err(VaultError::Decryption(_))));
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            CredentialVault::from_key_hex("1234"),
            Err(VaultError::InvalidKey(_))
        ));
        let long_key = format!("{KEY_HEX}20");
        assert!(matches!(
            CredentialVault::from_key_hex(&long_key),
            Err(VaultError::InvalidKey(_))
        ));
        assert!(matches!(
            CredentialVault::from_key_hex("not-a-hex-string"),
            Err(VaultError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_open_malformed_ciphertext() {
        let vault = CredentialVault::from_key_hex(KEY_HEX).unwrap();

        assert!(matches!(
            vault.open("not-a-hex-cipher"),
            Err(VaultError::Decryption(_))
        ));
        // Valid hex but shorter than a nonce.
        assert!(matches!(vault.open("0badc0de"), Err(VaultError::Decryption(_))));
    }

    #[test]
    fn test_generate_key_into_persists_and_parses() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env.local");

        let key_hex = generate_key_into(&env_file).unwrap();
        let content = std::fs::read_to_string(&env_file).unwrap();
        assert!(content.contains(&format!("{KEY_ENV_VAR}={key_hex}")));

        // The generated key is usable as-is.
        let vault = CredentialVault::from_key_hex(&key_hex).unwrap();
        let sealed = vault.seal("cookie jar").unwrap();
        assert_eq!(vault.open(&sealed).unwrap(), "cookie jar");
    }

    #[test]
    fn test_generate_key_into_reuses_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env.local");
        std::fs::write(&env_file, format!("{KEY_ENV_VAR}={KEY_HEX}\n")).unwrap();

        let key_hex = generate_key_into(&env_file).unwrap();
        assert_eq!(key_hex, KEY_HEX);
        let content = std::fs::read_to_string(&env_file).unwrap();
        assert_eq!(content.matches(KEY_ENV_VAR).count(), 1);
    }
}
