//! Block device over a key-value object store.
//!
//! Each device lives under a caller-chosen prefix:
//!
//! ```text
//! <prefix>/header    device prefix + caller header (see crate::layout)
//! <prefix>/b<index>  one object per block, exactly block_size bytes
//! ```
//!
//! The store is consumed only through [`ObjectStore`]'s four operations, so
//! a cloud bucket client can be plugged in without touching this module.

mod directory;
mod memory;

pub use directory::DirectoryObjectStore;
pub use memory::MemoryObjectStore;

use crate::backend::{BlockDevice, BlockInitializer, BlockStorage};
use crate::config::{BlockStorageConfig, OpenOptions, ProgressSink};
use crate::error::{StorageError, StorageResult};
use crate::layout::{self, DevicePrefix, DEVICE_PREFIX_SIZE};
use crate::stats::IoStats;
use std::fmt;

/// The minimal key-value interface a device needs from an object store.
///
/// Cloning a store must produce an independent handle (its own session or
/// connection) to the same objects.
pub trait ObjectStore: Clone + fmt::Debug + Send + Sync {
    /// Returns true if an object exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Downloads the object under `key`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn download(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Uploads `data` under `key`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn upload(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes every object whose key starts with `prefix`, returning how many
    /// were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if an object cannot be removed.
    fn clear(&self, prefix: &str, progress: Option<&dyn ProgressSink>) -> StorageResult<u64>;
}

/// Where an object-store device lives.
#[derive(Debug, Clone)]
pub struct ObjectLocation<O> {
    /// The store holding the objects.
    pub store: O,
    /// Key prefix shared by every object of the device.
    pub prefix: String,
}

impl<O: ObjectStore> ObjectLocation<O> {
    /// Creates a location.
    pub fn new(store: O, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Key of the header object.
    #[must_use]
    pub fn header_key(&self) -> String {
        format!("{}/header", self.prefix)
    }

    /// Key of the object holding block `index`.
    #[must_use]
    pub fn block_key(&self, index: u64) -> String {
        format!("{}/b{index}", self.prefix)
    }

    fn clear_prefix(&self) -> String {
        format!("{}/", self.prefix)
    }
}

/// A block device storing one object per block.
///
/// A block object that has gone missing is reported as an out-of-range error,
/// the same kind a local device reports for a bad index.
#[derive(Debug)]
pub struct ObjectStoreBlockStorage<O: ObjectStore> {
    location: ObjectLocation<O>,
    prefix: DevicePrefix,
    header_data: Vec<u8>,
    stats: IoStats,
    owns_lock: bool,
}

impl<O: ObjectStore> ObjectStoreBlockStorage<O> {
    /// Returns the store and prefix of this device.
    #[must_use]
    pub fn object_location(&self) -> &ObjectLocation<O> {
        &self.location
    }

    /// Removes every object of the device at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to remove an object.
    pub fn delete(
        location: &ObjectLocation<O>,
        progress: Option<&dyn ProgressSink>,
    ) -> StorageResult<u64> {
        let removed = location.store.clear(&location.clear_prefix(), progress)?;
        tracing::info!(prefix = %location.prefix, removed, "deleted object device");
        Ok(removed)
    }

    fn upload_header(&self, locked: bool, header_data: &[u8]) -> StorageResult<()> {
        let prefix = DevicePrefix {
            locked,
            ..self.prefix
        };
        let mut object = Vec::with_capacity(DEVICE_PREFIX_SIZE + header_data.len());
        object.extend_from_slice(&prefix.encode());
        object.extend_from_slice(header_data);
        self.location
            .store
            .upload(&self.location.header_key(), &object)?;
        self.stats.record_sent(object.len());
        Ok(())
    }

    /// Reads the lock flag as it currently stands in the store.
    fn stored_lock(&self) -> StorageResult<bool> {
        let header = self
            .location
            .store
            .download(&self.location.header_key())?
            .ok_or_else(|| StorageError::not_found(self.location.prefix.clone()))?;
        self.stats.record_received(header.len());
        Ok(DevicePrefix::decode(&header)?.locked)
    }

    fn release_lock(&mut self) -> StorageResult<()> {
        if self.owns_lock {
            self.upload_header(false, &self.header_data)?;
            self.owns_lock = false;
        }
        Ok(())
    }
}

impl<O: ObjectStore> BlockStorage for ObjectStoreBlockStorage<O> {
    fn block_size(&self) -> usize {
        self.prefix.block_size
    }

    fn block_count(&self) -> u64 {
        self.prefix.block_count
    }

    fn header_data(&self) -> &[u8] {
        &self.header_data
    }

    fn storage_name(&self) -> String {
        self.location.prefix.clone()
    }

    fn read_block(&self, index: u64) -> StorageResult<Vec<u8>> {
        layout::check_index(index, self.prefix.block_count)?;
        let block = self
            .location
            .store
            .download(&self.location.block_key(index))?
            .ok_or(StorageError::OutOfRange {
                index,
                block_count: self.prefix.block_count,
            })?;
        if block.len() != self.prefix.block_size {
            return Err(StorageError::invalid_format(format!(
                "block object {index} is {} bytes, expected {}",
                block.len(),
                self.prefix.block_size
            )));
        }
        self.stats.record_received(block.len());
        tracing::trace!(index, "downloaded block");
        Ok(block)
    }

    fn write_block(&mut self, index: u64, data: &[u8]) -> StorageResult<()> {
        layout::check_index(index, self.prefix.block_count)?;
        layout::check_block_len(data.len(), self.prefix.block_size)?;
        self.location
            .store
            .upload(&self.location.block_key(index), data)?;
        self.stats.record_sent(data.len());
        tracing::trace!(index, "uploaded block");
        Ok(())
    }

    fn update_header_data(&mut self, new_header: &[u8]) -> StorageResult<()> {
        if new_header.len() != self.header_data.len() {
            return Err(StorageError::HeaderSizeMismatch {
                expected: self.header_data.len(),
                actual: new_header.len(),
            });
        }
        // Handles that do not own the lock keep whatever flag the owner left.
        let locked = self.owns_lock || self.stored_lock()?;
        self.upload_header(locked, new_header)?;
        self.header_data = new_header.to_vec();
        Ok(())
    }

    fn bytes_sent(&self) -> u64 {
        self.stats.bytes_sent()
    }

    fn bytes_received(&self) -> u64 {
        self.stats.bytes_received()
    }

    fn sync(&mut self) -> StorageResult<()> {
        // Uploads complete synchronously
        Ok(())
    }
}

impl<O: ObjectStore> BlockDevice for ObjectStoreBlockStorage<O> {
    type Location = ObjectLocation<O>;

    fn setup(
        location: &ObjectLocation<O>,
        config: &BlockStorageConfig,
        initializer: Option<&BlockInitializer<'_>>,
    ) -> StorageResult<Self> {
        config.validate()?;
        layout::storage_size(
            config.block_size,
            config.block_count,
            config.header_data.len(),
            false,
        )?;
        if Self::exists(location)? {
            if !config.ignore_existing {
                return Err(StorageError::AlreadyExists {
                    name: location.prefix.clone(),
                });
            }
            Self::delete(location, config.progress.as_deref())?;
        }

        let prefix = DevicePrefix {
            block_size: config.block_size,
            block_count: config.block_count,
            header_len: config.header_data.len() as u32,
            locked: false,
        };

        let zeros = vec![0u8; config.block_size];
        for index in 0..config.block_count {
            let key = location.block_key(index);
            match initializer {
                Some(init) => {
                    let block = init(index)?;
                    layout::check_block_len(block.len(), config.block_size)?;
                    location.store.upload(&key, &block)?;
                }
                None => location.store.upload(&key, &zeros)?,
            }
            config.report_progress(1);
        }

        // The header goes last: a device without one does not exist, so an
        // interrupted setup is never opened.
        let mut header = Vec::with_capacity(DEVICE_PREFIX_SIZE + config.header_data.len());
        header.extend_from_slice(&prefix.encode());
        header.extend_from_slice(&config.header_data);
        location.store.upload(&location.header_key(), &header)?;

        tracing::info!(
            prefix = %location.prefix,
            block_size = config.block_size,
            block_count = config.block_count,
            "created object store device"
        );

        Self::open(location, &OpenOptions::default())
    }

    fn open(location: &ObjectLocation<O>, options: &OpenOptions) -> StorageResult<Self> {
        let header = location
            .store
            .download(&location.header_key())?
            .ok_or_else(|| StorageError::not_found(location.prefix.clone()))?;
        let prefix = DevicePrefix::decode(&header)?;
        let header_end = DEVICE_PREFIX_SIZE + prefix.header_len as usize;
        if header.len() != header_end {
            return Err(StorageError::invalid_format(format!(
                "header object is {} bytes, expected {header_end}",
                header.len()
            )));
        }
        if prefix.locked {
            if !options.ignore_lock {
                return Err(StorageError::Locked {
                    name: location.prefix.clone(),
                });
            }
            tracing::warn!(prefix = %location.prefix, "opening locked device, lock ignored");
        }

        let mut storage = Self {
            location: location.clone(),
            prefix,
            header_data: header[DEVICE_PREFIX_SIZE..].to_vec(),
            stats: IoStats::new(),
            owns_lock: false,
        };
        storage.stats.record_received(header.len());

        if !options.ignore_lock {
            storage.upload_header(true, &storage.header_data)?;
            storage.owns_lock = true;
        }

        Ok(storage)
    }

    fn exists(location: &ObjectLocation<O>) -> StorageResult<bool> {
        location.store.exists(&location.header_key())
    }

    fn location(&self) -> &ObjectLocation<O> {
        &self.location
    }

    fn close(mut self) -> StorageResult<()> {
        self.release_lock()?;
        tracing::info!(prefix = %self.location.prefix, "closed object store device");
        Ok(())
    }
}

impl<O: ObjectStore> Drop for ObjectStoreBlockStorage<O> {
    fn drop(&mut self) {
        if let Err(e) = self.release_lock() {
            tracing::warn!(prefix = %self.location.prefix, error = %e, "failed to release device lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter(AtomicU64);

    impl ProgressSink for Counter {
        fn on_progress(&self, n: u64) {
            self.0.fetch_add(n, Ordering::Relaxed);
        }
    }

    fn location(store: &MemoryObjectStore) -> ObjectLocation<MemoryObjectStore> {
        ObjectLocation::new(store.clone(), "heap")
    }

    #[test]
    fn object_keys() {
        let loc = location(&MemoryObjectStore::new());
        assert_eq!(loc.header_key(), "heap/header");
        assert_eq!(loc.block_key(12), "heap/b12");
    }

    #[test]
    fn object_setup_creates_one_object_per_block() {
        let store = MemoryObjectStore::new();
        let config = BlockStorageConfig::new(32, 5).header_data(b"xyz".to_vec());
        let device = ObjectStoreBlockStorage::setup(&location(&store), &config, None).unwrap();

        assert_eq!(store.len(), 6);
        assert_eq!(
            store.total_size(),
            ObjectStoreBlockStorage::<MemoryObjectStore>::compute_storage_size(32, 5, 3, false)
                .unwrap()
        );
        assert_eq!(device.header_data(), b"xyz");
    }

    #[test]
    fn object_write_and_read() {
        let store = MemoryObjectStore::new();
        let config = BlockStorageConfig::new(4, 3);
        let mut device = ObjectStoreBlockStorage::setup(&location(&store), &config, None).unwrap();

        device.write_block(1, b"abcd").unwrap();
        assert_eq!(device.read_block(1).unwrap(), b"abcd");
        assert_eq!(device.read_block(0).unwrap(), vec![0u8; 4]);
        assert_eq!(store.download("heap/b1").unwrap().unwrap(), b"abcd");
    }

    #[test]
    fn object_missing_block_is_out_of_range() {
        let store = MemoryObjectStore::new();
        let config = BlockStorageConfig::new(4, 3);
        let device = ObjectStoreBlockStorage::setup(&location(&store), &config, None).unwrap();

        store.clear("heap/b2", None).unwrap();
        assert!(device.read_block(2).unwrap_err().is_out_of_range());
        assert!(device.read_block(3).unwrap_err().is_out_of_range());
    }

    #[test]
    fn object_lock_and_clone() {
        let store = MemoryObjectStore::new();
        let config = BlockStorageConfig::new(4, 3);
        let mut device = ObjectStoreBlockStorage::setup(&location(&store), &config, None).unwrap();

        assert!(matches!(
            ObjectStoreBlockStorage::open(&location(&store), &OpenOptions::default()),
            Err(StorageError::Locked { .. })
        ));

        let clone = device.clone_device().unwrap();
        device.write_block(0, b"wxyz").unwrap();
        assert_eq!(clone.read_block(0).unwrap(), b"wxyz");
        drop(clone);

        device.close().unwrap();
        assert!(ObjectStoreBlockStorage::open(&location(&store), &OpenOptions::default()).is_ok());
    }

    #[test]
    fn object_clone_header_update_keeps_stored_lock() {
        let store = MemoryObjectStore::new();
        let loc = location(&store);
        let config = BlockStorageConfig::new(4, 3).header_data(b"ab".to_vec());
        let owner = ObjectStoreBlockStorage::setup(&loc, &config, None).unwrap();

        let mut clone = owner.clone_device().unwrap();
        owner.close().unwrap();
        clone.update_header_data(b"cd").unwrap();
        drop(clone);

        let reopened = ObjectStoreBlockStorage::open(&loc, &OpenOptions::default()).unwrap();
        assert_eq!(reopened.header_data(), b"cd");

        let mut late_clone = reopened.clone_device().unwrap();
        late_clone.update_header_data(b"ef").unwrap();
        drop(late_clone);
        assert!(matches!(
            ObjectStoreBlockStorage::open(&loc, &OpenOptions::default()),
            Err(StorageError::Locked { .. })
        ));
    }

    #[test]
    fn object_failed_header_update_keeps_header() {
        let store = MemoryObjectStore::new();
        let loc = location(&store);
        let config = BlockStorageConfig::new(4, 3).header_data(b"ab".to_vec());
        let mut device = ObjectStoreBlockStorage::setup(&loc, &config, None).unwrap();
        let mut clone = device.clone_device().unwrap();

        ObjectStoreBlockStorage::delete(&loc, None).unwrap();
        assert!(matches!(
            clone.update_header_data(b"cd"),
            Err(StorageError::NotFound { .. })
        ));
        assert_eq!(clone.header_data(), b"ab");
        assert!(device.update_header_data(b"cd").is_ok());
    }

    #[test]
    fn object_setup_over_existing_reports_clear_progress() {
        let store = MemoryObjectStore::new();
        let loc = location(&store);
        let config = BlockStorageConfig::new(4, 3);
        drop(ObjectStoreBlockStorage::setup(&loc, &config, None).unwrap());

        let counter = Arc::new(Counter::default());
        let config = config.ignore_existing(true).progress(counter.clone());
        drop(ObjectStoreBlockStorage::setup(&loc, &config, None).unwrap());
        assert_eq!(counter.0.load(Ordering::Relaxed), 4 + 3);
    }

    #[test]
    fn object_existing_and_delete() {
        let store = MemoryObjectStore::new();
        let loc = location(&store);
        let config = BlockStorageConfig::new(4, 3);
        drop(ObjectStoreBlockStorage::setup(&loc, &config, None).unwrap());

        assert!(matches!(
            ObjectStoreBlockStorage::setup(&loc, &config, None),
            Err(StorageError::AlreadyExists { .. })
        ));

        let removed = ObjectStoreBlockStorage::delete(&loc, None).unwrap();
        assert_eq!(removed, 4);
        assert!(!ObjectStoreBlockStorage::exists(&loc).unwrap());
        assert!(matches!(
            ObjectStoreBlockStorage::open(&loc, &OpenOptions::default()),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn object_prefixes_are_isolated() {
        let store = MemoryObjectStore::new();
        let config = BlockStorageConfig::new(4, 2);
        let a = ObjectLocation::new(store.clone(), "a");
        let ab = ObjectLocation::new(store.clone(), "ab");
        drop(ObjectStoreBlockStorage::setup(&a, &config, None).unwrap());
        drop(ObjectStoreBlockStorage::setup(&ab, &config, None).unwrap());

        ObjectStoreBlockStorage::delete(&a, None).unwrap();
        assert!(ObjectStoreBlockStorage::exists(&ab).unwrap());
    }
}
