//! Encrypted at-rest store for provider API keys.
//!
//! The on-disk envelope is AES-256-GCM with a key derived from
//! `DECANT_MASTER_KEY` via PBKDF2-HMAC-SHA256. Without a master key the
//! store still works, but keys live in-process only and are never
//! written to disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use decant_common::DecantError;

const PBKDF2_ITERATIONS: u32 = 150_000;
const KEY_LENGTH_BYTES: usize = 32;
const SALT_LENGTH_BYTES: usize = 16;
const NONCE_LENGTH_BYTES: usize = 12;

/// Serialized envelope written to disk.
#[derive(Serialize, Deserialize)]
struct EncryptedEnvelope {
    salt: String,
    nonce: String,
    ciphertext: String,
}

#[derive(Debug)]
pub struct Keystore {
    path: PathBuf,
    master_key: Option<String>,
    entries: Mutex<HashMap<String, String>>,
}

impl Keystore {
    /// Open the keystore, decrypting the existing file when a master key
    /// is available. A wrong master key fails loudly rather than
    /// silently discarding stored keys.
    pub fn open(path: PathBuf, master_key: Option<String>) -> Result<Self, DecantError> {
        let entries = match (&master_key, path.exists()) {
            (Some(master), true) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| DecantError::Internal(format!("Keystore read: {}", e)))?;
                let envelope: EncryptedEnvelope = serde_json::from_str(&raw)?;
                decrypt_entries(&envelope, master)?
            }
            (None, true) => {
                tracing::warn!(
                    path = %path.display(),
                    "Keystore file present but DECANT_MASTER_KEY unset — stored keys unavailable"
                );
                HashMap::new()
            }
            _ => HashMap::new(),
        };

        if master_key.is_none() {
            tracing::warn!("DECANT_MASTER_KEY unset — API keys will not be persisted");
        }

        Ok(Self {
            path,
            master_key,
            entries: Mutex::new(entries),
        })
    }

    /// Store a provider key. Returns whether it was persisted to disk
    /// (false means in-memory only, no master key configured).
    pub fn set(&self, provider: &str, api_key: &str) -> Result<bool, DecantError> {
        let provider = provider.trim().to_lowercase();
        if provider.is_empty() {
            return Err(DecantError::Validation("provider is required".into()));
        }
        if api_key.trim().is_empty() {
            return Err(DecantError::Validation("apiKey is required".into()));
        }

        let snapshot = {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(provider, api_key.trim().to_string());
            entries.clone()
        };

        self.persist(&snapshot)
    }

    pub fn get(&self, provider: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(&provider.trim().to_lowercase())
            .cloned()
    }

    /// Remove a provider key. Returns whether it existed.
    pub fn delete(&self, provider: &str) -> Result<bool, DecantError> {
        let (existed, snapshot) = {
            let mut entries = self.entries.lock().unwrap();
            let existed = entries.remove(&provider.trim().to_lowercase()).is_some();
            (existed, entries.clone())
        };

        if existed {
            self.persist(&snapshot)?;
        }
        Ok(existed)
    }

    /// Provider names only — key values never leave the store.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<bool, DecantError> {
        let Some(master) = &self.master_key else {
            return Ok(false);
        };

        let envelope = encrypt_entries(entries, master)?;
        let serialized = serde_json::to_string_pretty(&envelope)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DecantError::Internal(format!("Keystore dir: {}", e)))?;
        }
        std::fs::write(&self.path, serialized)
            .map_err(|e| DecantError::Internal(format!("Keystore write: {}", e)))?;

        Ok(true)
    }
}

fn derive_key(master: &str, salt: &[u8]) -> [u8; KEY_LENGTH_BYTES] {
    let mut derived = [0u8; KEY_LENGTH_BYTES];
    pbkdf2_hmac::<Sha256>(master.as_bytes(), salt, PBKDF2_ITERATIONS, &mut derived);
    derived
}

fn encrypt_entries(
    entries: &HashMap<String, String>,
    master: &str,
) -> Result<EncryptedEnvelope, DecantError> {
    let mut salt = [0u8; SALT_LENGTH_BYTES];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LENGTH_BYTES];
    OsRng.fill_bytes(&mut nonce_bytes);

    let derived = derive_key(master, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = serde_json::to_vec(entries)?;
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| DecantError::Internal("Keystore encryption failed".into()))?;

    Ok(EncryptedEnvelope {
        salt: BASE64.encode(salt),
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    })
}

fn decrypt_entries(
    envelope: &EncryptedEnvelope,
    master: &str,
) -> Result<HashMap<String, String>, DecantError> {
    let salt = BASE64
        .decode(&envelope.salt)
        .map_err(|e| DecantError::Internal(format!("Keystore salt: {}", e)))?;
    let nonce_bytes = BASE64
        .decode(&envelope.nonce)
        .map_err(|e| DecantError::Internal(format!("Keystore nonce: {}", e)))?;
    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| DecantError::Internal(format!("Keystore ciphertext: {}", e)))?;

    let derived = derive_key(master, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| {
            DecantError::Unauthorized("Keystore integrity check failed — wrong master key".into())
        })?;

    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_master_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json.enc");

        let store = Keystore::open(path.clone(), Some("hunter2".into())).unwrap();
        assert!(store.set("openai", "sk-test-123").unwrap());
        assert_eq!(store.get("openai").as_deref(), Some("sk-test-123"));

        // Reopen from disk.
        let reopened = Keystore::open(path, Some("hunter2".into())).unwrap();
        assert_eq!(reopened.get("openai").as_deref(), Some("sk-test-123"));
        assert_eq!(reopened.providers(), vec!["openai".to_string()]);
    }

    #[test]
    fn test_wrong_master_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json.enc");

        let store = Keystore::open(path.clone(), Some("correct".into())).unwrap();
        store.set("openai", "sk-test").unwrap();

        let err = Keystore::open(path, Some("wrong".into())).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_no_master_key_is_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json.enc");

        let store = Keystore::open(path.clone(), None).unwrap();
        let persisted = store.set("youtube", "yt-key").unwrap();
        assert!(!persisted);
        assert_eq!(store.get("youtube").as_deref(), Some("yt-key"));
        assert!(!path.exists());
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = Keystore::open(dir.path().join("k.enc"), Some("m".into())).unwrap();
        store.set("github", "tok").unwrap();
        assert!(store.delete("github").unwrap());
        assert!(!store.delete("github").unwrap());
        assert!(store.get("github").is_none());
    }

    #[test]
    fn test_validation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Keystore::open(dir.path().join("k.enc"), None).unwrap();
        assert!(store.set("", "x").is_err());
        assert!(store.set("openai", "  ").is_err());
    }
}
