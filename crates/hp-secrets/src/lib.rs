//! HostPilot Signing Key Storage
//!
//! Server signing keys are kept only as raw bytes under a key store keyed by
//! server id. Backends:
//! - In-memory (development and tests)
//! - Encrypted local file storage (AES-256-GCM)

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use zeroize::Zeroizing;

mod encrypted;
mod memory;

pub use encrypted::EncryptedFileKeyStore;
pub use memory::MemoryKeyStore;

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Invalid key id: {0}")]
    InvalidKeyId(String),
    #[error("Encryption error: {0}")]
    EncryptionError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SecretsError>;

/// Raw key bytes, wiped from memory on drop
pub type KeyBytes = Zeroizing<Vec<u8>>;

/// Configuration for key store providers
#[derive(Debug, Clone)]
pub struct SecretsConfig {
    pub provider: String,
    pub encryption_key: Option<String>,
    pub data_dir: PathBuf,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            encryption_key: None,
            data_dir: PathBuf::from("./data/keys"),
        }
    }
}

/// Key store trait
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Get key bytes by id
    async fn get(&self, key_id: &str) -> Result<KeyBytes>;

    /// Store key bytes, replacing any existing value
    async fn put(&self, key_id: &str, bytes: &[u8]) -> Result<()>;

    /// Delete a key; deleting a missing key is not an error
    async fn delete(&self, key_id: &str) -> Result<()>;

    /// Provider name
    fn name(&self) -> &str;
}

/// Key ids end up in file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_key_id(key_id: &str) -> Result<()> {
    let valid = !key_id.is_empty()
        && key_id.len() <= 128
        && key_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SecretsError::InvalidKeyId(key_id.to_string()))
    }
}

/// Create a key store based on configuration
pub async fn create_key_store(config: &SecretsConfig) -> Result<Arc<dyn KeyStore>> {
    match config.provider.as_str() {
        "memory" => {
            info!("Using in-memory key store (keys are lost on restart)");
            Ok(Arc::new(MemoryKeyStore::new()))
        }
        "encrypted" => {
            let key = config.encryption_key.as_ref().ok_or_else(|| {
                SecretsError::ProviderError("Encryption key required for encrypted provider".to_string())
            })?;
            info!("Using encrypted file key store at {}", config.data_dir.display());
            let store = EncryptedFileKeyStore::new(key, &config.data_dir).await?;
            Ok(Arc::new(store))
        }
        other => Err(SecretsError::ProviderError(format!("Unknown provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_id() {
        assert!(validate_key_id("srv_01HZX-abc").is_ok());
        assert!(validate_key_id("").is_err());
        assert!(validate_key_id("../etc/passwd").is_err());
        assert!(validate_key_id("a/b").is_err());
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_key_store(&SecretsConfig::default()).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_encrypted_requires_key() {
        let config = SecretsConfig {
            provider: "encrypted".to_string(),
            ..Default::default()
        };
        let err = create_key_store(&config).await.err().unwrap();
        assert!(matches!(err, SecretsError::ProviderError(_)));
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let config = SecretsConfig {
            provider: "vault".to_string(),
            ..Default::default()
        };
        assert!(create_key_store(&config).await.is_err());
    }
}
