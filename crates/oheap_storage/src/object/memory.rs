//! In-memory object store.

use super::ObjectStore;
use crate::config::ProgressSink;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An object store kept in a shared map.
///
/// Clones share the same objects. Stands in for a cloud bucket in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Returns the combined size of all objects in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.objects
            .read()
            .values()
            .map(|object| object.len() as u64)
            .sum()
    }

    /// Returns the stored keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    fn download(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.objects.read().get(key).cloned())
    }

    fn upload(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.objects.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn clear(&self, prefix: &str, progress: Option<&dyn ProgressSink>) -> StorageResult<u64> {
        let mut objects = self.objects.write();
        let doomed: Vec<String> = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            objects.remove(key);
            if let Some(sink) = progress {
                sink.on_progress(1);
            }
        }
        Ok(doomed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_download_exists() {
        let store = MemoryObjectStore::new();
        assert!(!store.exists("k").unwrap());
        assert_eq!(store.download("k").unwrap(), None);

        store.upload("k", b"value").unwrap();
        assert!(store.exists("k").unwrap());
        assert_eq!(store.download("k").unwrap().unwrap(), b"value");
        assert_eq!(store.total_size(), 5);
    }

    #[test]
    fn clear_only_matching_prefix() {
        let store = MemoryObjectStore::new();
        for key in ["a/1", "a/2", "ab/1", "b/1"] {
            store.upload(key, b"x").unwrap();
        }

        assert_eq!(store.clear("a/", None).unwrap(), 2);
        assert_eq!(store.keys(), vec!["ab/1".to_string(), "b/1".to_string()]);
    }

    #[test]
    fn clones_share_objects() {
        let store = MemoryObjectStore::new();
        let other = store.clone();
        store.upload("k", b"v").unwrap();
        assert!(other.exists("k").unwrap());
    }
}
