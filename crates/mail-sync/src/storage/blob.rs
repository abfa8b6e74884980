//! Blob storage for attachment content

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Key for storing/retrieving attachment content
///
/// The key's string form is the `content_ref` stored on attachment records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey(String);

impl BlobKey {
    /// Fresh random key for new content
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard prefix (first 2 chars)
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or("xx")
    }
}

/// Trait for blob storage operations
///
/// Implementations handle compression/decompression internally.
pub trait BlobStore: Send + Sync {
    /// Store blob content
    fn put(&self, key: &BlobKey, data: &[u8]) -> Result<()>;
}

/// In-memory blob store for tests and ephemeral runs
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobKey, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &BlobKey, data: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_unique_and_sharded() {
        let a = BlobKey::generate();
        let b = BlobKey::generate();
        assert_ne!(a, b);
        assert_eq!(a.shard().len(), 2);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().starts_with(a.shard()));
    }

    #[test]
    fn test_memory_store_overwrites_same_key() {
        let store = InMemoryBlobStore::new();
        assert!(store.is_empty());
        let key = BlobKey::generate();
        store.put(&key, b"first").unwrap();
        store.put(&key, b"second").unwrap();
        store.put(&BlobKey::generate(), b"other").unwrap();
        assert_eq!(store.len(), 2);
    }
}
