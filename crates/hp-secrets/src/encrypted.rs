//! Encrypted file key store
//!
//! One file per key id under the data directory. File contents are
//! base64(nonce || ciphertext) with a fresh 96-bit nonce per write.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{validate_key_id, KeyBytes, KeyStore, Result, SecretsError};

const NONCE_LEN: usize = 12;
const KEY_FILE_EXTENSION: &str = "key";

pub struct EncryptedFileKeyStore {
    cipher: Aes256Gcm,
    data_dir: PathBuf,
}

impl EncryptedFileKeyStore {
    /// `encryption_key` is a base64-encoded 32 byte AES key.
    pub async fn new(encryption_key: &str, data_dir: &Path) -> Result<Self> {
        let key = Zeroizing::new(
            STANDARD
                .decode(encryption_key.trim())
                .map_err(|e| SecretsError::EncryptionError(format!("Invalid base64 key: {}", e)))?,
        );
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| SecretsError::EncryptionError("Encryption key must be 32 bytes".to_string()))?;

        tokio::fs::create_dir_all(data_dir).await?;

        Ok(Self {
            cipher,
            data_dir: data_dir.to_path_buf(),
        })
    }

    fn path_for(&self, key_id: &str) -> Result<PathBuf> {
        validate_key_id(key_id)?;
        Ok(self
            .data_dir
            .join(format!("{}.{}", key_id, KEY_FILE_EXTENSION)))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| SecretsError::EncryptionError("Encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn open(&self, contents: &str) -> Result<KeyBytes> {
        let sealed = STANDARD
            .decode(contents.trim())
            .map_err(|e| SecretsError::EncryptionError(format!("Corrupt key file: {}", e)))?;
        if sealed.len() <= NONCE_LEN {
            return Err(SecretsError::EncryptionError("Corrupt key file: too short".to_string()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretsError::EncryptionError("Decryption failed".to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }
}

#[async_trait]
impl KeyStore for EncryptedFileKeyStore {
    async fn get(&self, key_id: &str) -> Result<KeyBytes> {
        let path = self.path_for(key_id)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SecretsError::NotFound(key_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        self.open(&contents)
    }

    async fn put(&self, key_id: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key_id)?;
        let sealed = self.seal(bytes)?;

        // Write to a temp file first so a crash never leaves a truncated key.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, sealed).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(key_id = %key_id, "Stored encrypted key");
        Ok(())
    }

    async fn delete(&self, key_id: &str) -> Result<()> {
        let path = self.path_for(key_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "encrypted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        STANDARD.encode([7u8; 32])
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileKeyStore::new(&test_key(), dir.path()).await.unwrap();

        store.put("server-1", b"super secret seed").await.unwrap();
        let loaded = store.get("server-1").await.unwrap();
        assert_eq!(loaded.as_slice(), b"super secret seed");

        let on_disk = std::fs::read_to_string(dir.path().join("server-1.key")).unwrap();
        assert!(!on_disk.contains("super secret seed"));
    }

    #[tokio::test]
    async fn test_wrong_key_cannot_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileKeyStore::new(&test_key(), dir.path()).await.unwrap();
        store.put("server-1", b"seed").await.unwrap();

        let other = EncryptedFileKeyStore::new(&STANDARD.encode([9u8; 32]), dir.path())
            .await
            .unwrap();
        assert!(matches!(
            other.get("server-1").await,
            Err(SecretsError::EncryptionError(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileKeyStore::new(&test_key(), dir.path()).await.unwrap();

        assert!(matches!(store.get("nope").await, Err(SecretsError::NotFound(_))));
        store.put("gone", b"x").await.unwrap();
        store.delete("gone").await.unwrap();
        store.delete("gone").await.unwrap();
        assert!(matches!(store.get("gone").await, Err(SecretsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_short_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = EncryptedFileKeyStore::new(&STANDARD.encode([1u8; 16]), dir.path()).await;
        assert!(matches!(result, Err(SecretsError::EncryptionError(_))));
    }
}
