//! Mailbox password encryption at rest.
//!
//! Passwords are stored as AES-256-GCM `"iv:tag:ciphertext"` hex tokens. The
//! engine only ever sees the [`SecretCipher`] trait; plaintext exists just long
//! enough to be written into a short-lived credential file.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use tracing::info;

use crate::error::SecretError;

/// Opaque, synchronous encrypt/decrypt capability.
pub trait SecretCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError>;
    fn decrypt(&self, token: &str) -> Result<String, SecretError>;
}

/// AES-256-GCM cipher with a 96-bit random nonce per secret.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(key: &[u8; 32]) -> Result<Self, SecretError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| SecretError::KeyLoad(format!("failed to create cipher: {e}")))?;
        Ok(Self { cipher })
    }

    /// Build from the configured key: env var first, then `{data_dir}/.mailshift_key`.
    pub fn from_config(env_key: Option<&str>, data_dir: &Path) -> Result<Self, SecretError> {
        let key = load_or_generate_key(env_key, data_dir)?;
        Self::new(&key)
    }
}

impl SecretCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut iv_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut iv_bytes);
        let nonce = Nonce::from_slice(&iv_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::Encrypt(e.to_string()))?;

        // AES-GCM appends the 16-byte tag to the ciphertext.
        let tag_offset = ciphertext.len() - 16;
        let (ct, tag) = ciphertext.split_at(tag_offset);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv_bytes),
            hex::encode(tag),
            hex::encode(ct)
        ))
    }

    fn decrypt(&self, token: &str) -> Result<String, SecretError> {
        if token.is_empty() {
            return Ok(String::new());
        }

        let parts: Vec<&str> = token.splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(SecretError::Format("expected iv:tag:ciphertext".into()));
        }

        let decode = |part: &str| {
            hex::decode(part).map_err(|e| SecretError::Format(format!("bad hex: {e}")))
        };
        let iv_bytes = decode(parts[0])?;
        let tag_bytes = decode(parts[1])?;
        let mut combined = decode(parts[2])?;

        if iv_bytes.len() != 12 {
            return Err(SecretError::Format(format!(
                "invalid IV length: expected 12, got {}",
                iv_bytes.len()
            )));
        }

        combined.extend_from_slice(&tag_bytes);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv_bytes), combined.as_ref())
            .map_err(|e| SecretError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| SecretError::Decrypt(e.to_string()))
    }
}

fn parse_key(hex_key: &str, origin: &str) -> Result<[u8; 32], SecretError> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| SecretError::KeyLoad(format!("{origin}: {e}")))?;
    if bytes.len() != 32 {
        return Err(SecretError::KeyLoad(format!(
            "{origin} must be 64 hex characters (32 bytes), got {} bytes",
            bytes.len()
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Resolve the encryption key, generating and persisting one on first use.
pub fn load_or_generate_key(env_key: Option<&str>, data_dir: &Path) -> Result<[u8; 32], SecretError> {
    if let Some(hex_key) = env_key {
        info!("Using encryption key from MAILSHIFT_ENCRYPTION_KEY");
        return parse_key(hex_key, "MAILSHIFT_ENCRYPTION_KEY");
    }

    let key_path = data_dir.join(".mailshift_key");
    if key_path.exists() {
        let hex_key = std::fs::read_to_string(&key_path)
            .map_err(|e| SecretError::KeyLoad(format!("{}: {e}", key_path.display())))?;
        info!("Loaded encryption key from {}", key_path.display());
        return parse_key(&hex_key, &key_path.display().to_string());
    }

    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    std::fs::create_dir_all(data_dir)
        .and_then(|_| std::fs::write(&key_path, hex::encode(key)))
        .map_err(|e| SecretError::KeyLoad(format!("{}: {e}", key_path.display())))?;
    info!("Generated new encryption key at {}", key_path.display());
    Ok(key)
}
