use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::{validate_key_id, KeyBytes, KeyStore, Result, SecretsError};

/// Process-local key store. Every instance owns its own map.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, key_id: &str) -> Result<KeyBytes> {
        self.keys
            .read()
            .get(key_id)
            .map(|bytes| Zeroizing::new(bytes.to_vec()))
            .ok_or_else(|| SecretsError::NotFound(key_id.to_string()))
    }

    async fn put(&self, key_id: &str, bytes: &[u8]) -> Result<()> {
        validate_key_id(key_id)?;
        self.keys
            .write()
            .insert(key_id.to_string(), Zeroizing::new(bytes.to_vec()));
        Ok(())
    }

    async fn delete(&self, key_id: &str) -> Result<()> {
        self.keys.write().remove(key_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryKeyStore::new();
        store.put("server-a", &[1, 2, 3]).await.unwrap();

        assert_eq!(store.get("server-a").await.unwrap().as_slice(), &[1, 2, 3]);
        assert_eq!(store.len(), 1);

        store.delete("server-a").await.unwrap();
        assert!(matches!(store.get("server-a").await, Err(SecretsError::NotFound(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_id() {
        let store = MemoryKeyStore::new();
        assert!(store.put("../x", &[0]).await.is_err());
    }
}
