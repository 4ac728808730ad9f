//! Process-local storage backend.
//!
//! Used for local development (`STORAGE_BACKEND=memory`) and as the fake store
//! in tests. State does not survive a restart.

use super::{BlobStore, KeyValueStore, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory implementation of both [`KeyValueStore`] and [`BlobStore`]
#[derive(Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, Value>>,
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys of all stored blobs, sorted
    pub async fn blob_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether a KV entry exists under `key`
    pub async fn contains_key(&self, key: &str) -> bool {
        self.values.read().await.contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for InMemoryStore {
    async fn get_blob(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put_blob(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.blobs.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn delete_blob(&self, key: &str) -> Result<(), StorageError> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}
