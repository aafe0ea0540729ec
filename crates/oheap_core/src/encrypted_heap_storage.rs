//! Bucket heap over an encrypted block device.

use crate::config::HeapConfig;
use crate::error::{HeapError, HeapResult};
use crate::heap::VirtualHeap;
use crate::heap_storage::HeapStorage;
use crate::path::{Bucket, PathStorage};
use oheap_storage::{
    BlockDevice, BlockStorage, EncryptedBlockStorage, EncryptionConfig, EncryptionKey, KeyMaterial,
    OpenOptions,
};
use std::fmt;

/// What an [`EncryptedHeapStorage`] is built from.
pub enum HeapSource<D: BlockDevice> {
    /// An already-opened encrypted storage. Carries its own key.
    Encrypted(EncryptedBlockStorage<D>),
    /// An opened raw device holding encrypted blocks. Needs key material.
    Raw(D),
}

impl<D: BlockDevice> From<EncryptedBlockStorage<D>> for HeapSource<D> {
    fn from(storage: EncryptedBlockStorage<D>) -> Self {
        Self::Encrypted(storage)
    }
}

impl<D: BlockDevice + fmt::Debug> fmt::Debug for HeapSource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypted(storage) => f.debug_tuple("Encrypted").field(storage).finish(),
            Self::Raw(device) => f.debug_tuple("Raw").field(device).finish(),
        }
    }
}

/// A bucket heap whose blocks are encrypted with AES-256-GCM.
///
/// The heap header and the caller header are stored in the clear but are
/// authenticated by [`EncryptedHeapStorage::verify_key`].
///
/// # Example
///
/// ```rust
/// use oheap_core::{EncryptedHeapStorage, HeapConfig, PathStorage};
/// use oheap_storage::{EncryptionConfig, MemoryBlockStorage, MemoryRegion, OpenOptions};
///
/// let region = MemoryRegion::new();
/// let config = HeapConfig::new(16, 2);
/// let mut heap = EncryptedHeapStorage::<MemoryBlockStorage>::setup(
///     &region,
///     &config,
///     &EncryptionConfig::new(),
/// )
/// .unwrap();
/// heap.write_path(3, &[vec![vec![1; 16]], vec![vec![2; 16]], vec![vec![3; 16]]]).unwrap();
/// let key = heap.key().clone();
/// heap.close().unwrap();
///
/// let heap = EncryptedHeapStorage::<MemoryBlockStorage>::open(
///     &region,
///     key.into(),
///     &OpenOptions::new(),
/// )
/// .unwrap();
/// assert_eq!(heap.read_path(3).unwrap()[2], vec![vec![3; 16]]);
/// ```
pub struct EncryptedHeapStorage<D: BlockDevice> {
    inner: HeapStorage<EncryptedBlockStorage<D>>,
}

impl<D: BlockDevice> EncryptedHeapStorage<D> {
    /// Builds a heap from an opened storage.
    ///
    /// `key` must be given for [`HeapSource::Raw`] and must be omitted for
    /// [`HeapSource::Encrypted`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the key argument does not fit the
    /// source, a format error if the device is not an encrypted heap.
    pub fn new(source: HeapSource<D>, key: Option<KeyMaterial>) -> HeapResult<Self> {
        let storage = match (source, key) {
            (HeapSource::Encrypted(storage), None) => storage,
            (HeapSource::Encrypted(_), Some(_)) => {
                return Err(HeapError::config(
                    "key material cannot be combined with an opened encrypted storage",
                ))
            }
            (HeapSource::Raw(device), Some(key)) => EncryptedBlockStorage::from_raw(device, key)?,
            (HeapSource::Raw(_), None) => {
                return Err(HeapError::config("a raw device needs key material"))
            }
        };
        Ok(Self {
            inner: HeapStorage::new(storage)?,
        })
    }

    /// Creates an encrypted heap device at `location`.
    ///
    /// The block count is derived from the heap shape. Every block starts as
    /// the encryption of zeros.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any I/O if the configuration is
    /// invalid, or any error from the device setup.
    pub fn setup(
        location: &D::Location,
        config: &HeapConfig,
        encryption: &EncryptionConfig,
    ) -> HeapResult<Self> {
        let storage_config = config.block_storage_config()?;
        let storage = EncryptedBlockStorage::<D>::setup(location, &storage_config, encryption, None)?;
        tracing::info!(
            storage = %storage.storage_name(),
            heap_base = config.heap_base,
            heap_height = config.heap_height,
            blocks_per_bucket = config.blocks_per_bucket,
            block_size = config.block_size,
            "created encrypted heap storage"
        );
        Self::new(HeapSource::Encrypted(storage), None)
    }

    /// Opens an existing encrypted heap device.
    ///
    /// # Errors
    ///
    /// Returns any error from opening the device, or a format error if it is
    /// not an encrypted heap. A wrong key is only reported here when
    /// `options.verify_key` is set.
    pub fn open(
        location: &D::Location,
        key: KeyMaterial,
        options: &OpenOptions,
    ) -> HeapResult<Self> {
        let storage = EncryptedBlockStorage::<D>::open(location, key, options)?;
        let heap = Self::new(HeapSource::Encrypted(storage), None)?;
        tracing::info!(storage = %heap.inner.storage_name(), "opened encrypted heap storage");
        Ok(heap)
    }

    /// Returns true if a device exists at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be queried.
    pub fn exists(location: &D::Location) -> HeapResult<bool> {
        Ok(D::exists(location)?)
    }

    /// Computes the bytes an encrypted heap device with this configuration
    /// occupies on the raw medium.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid or the
    /// size overflows.
    pub fn compute_storage_size(config: &HeapConfig, ignore_header: bool) -> HeapResult<u64> {
        config.validate()?;
        let heap = config.virtual_heap()?;
        Ok(EncryptedBlockStorage::<D>::compute_storage_size(
            config.block_size,
            heap.block_count(),
            config.device_header_len(),
            ignore_header,
        )?)
    }

    /// Returns the key in use.
    #[must_use]
    pub fn key(&self) -> &EncryptionKey {
        self.inner.storage().key()
    }

    /// Checks the key against the device's key-check value.
    ///
    /// # Errors
    ///
    /// Returns an integrity error if the key is wrong or a header was altered.
    pub fn verify_key(&self) -> HeapResult<()> {
        self.inner.storage().verify_key()?;
        Ok(())
    }

    /// Returns the raw device holding the ciphertext.
    #[must_use]
    pub fn raw_storage(&self) -> &D {
        self.inner.storage().raw_storage()
    }

    /// Returns the encrypted block storage under the heap.
    #[must_use]
    pub fn encrypted_storage(&self) -> &EncryptedBlockStorage<D> {
        self.inner.storage()
    }

    /// Returns the heap over the encrypted storage.
    #[must_use]
    pub fn heap_storage(&self) -> &HeapStorage<EncryptedBlockStorage<D>> {
        &self.inner
    }

    /// Returns the heap over the encrypted storage mutably.
    pub fn heap_storage_mut(&mut self) -> &mut HeapStorage<EncryptedBlockStorage<D>> {
        &mut self.inner
    }

    /// Returns the caller header, without heap or encryption headers.
    #[must_use]
    pub fn header_data(&self) -> &[u8] {
        self.inner.header_data()
    }

    /// Replaces the caller header. The length must not change.
    ///
    /// # Errors
    ///
    /// Returns an error if the length differs or the write fails.
    pub fn update_header_data(&mut self, new_header: &[u8]) -> HeapResult<()> {
        self.inner.update_header_data(new_header)
    }

    /// Returns the plaintext size of one bucket in bytes.
    #[must_use]
    pub fn bucket_size(&self) -> usize {
        self.inner.bucket_size()
    }

    /// Returns bytes written to the raw medium through this handle.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent()
    }

    /// Returns bytes read from the raw medium through this handle.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received()
    }

    /// Reads and decrypts one bucket.
    ///
    /// # Errors
    ///
    /// Returns an integrity error if any block fails authentication.
    pub fn read_bucket(&self, bucket: u64) -> HeapResult<Bucket> {
        self.inner.read_bucket(bucket)
    }

    /// Encrypts and writes one bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range or has the wrong shape.
    pub fn write_bucket(&mut self, bucket: u64, blocks: &[Vec<u8>]) -> HeapResult<()> {
        self.inner.write_bucket(bucket, blocks)
    }

    /// Opens a second, independent handle with the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be reopened.
    pub fn clone_device(&self) -> HeapResult<Self> {
        let storage = self.inner.storage().clone_device()?;
        Self::new(HeapSource::Encrypted(storage), None)
    }

    /// Closes the device, releasing its lock.
    ///
    /// # Errors
    ///
    /// Returns any error from closing the device.
    pub fn close(self) -> HeapResult<()> {
        tracing::info!(storage = %self.inner.storage_name(), "closing encrypted heap storage");
        self.inner.into_storage().close()?;
        Ok(())
    }
}

impl<D: BlockDevice> PathStorage for EncryptedHeapStorage<D> {
    fn virtual_heap(&self) -> &VirtualHeap {
        self.inner.virtual_heap()
    }

    fn read_path_from_level(&self, bucket: u64, level_start: u32) -> HeapResult<Vec<Bucket>> {
        self.inner.read_path_from_level(bucket, level_start)
    }

    fn write_path_from_level(
        &mut self,
        bucket: u64,
        level_start: u32,
        buckets: &[Bucket],
    ) -> HeapResult<()> {
        self.inner.write_path_from_level(bucket, level_start, buckets)
    }
}

impl<D: BlockDevice + fmt::Debug> fmt::Debug for EncryptedHeapStorage<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedHeapStorage")
            .field("heap", self.inner.virtual_heap())
            .field("storage", self.inner.storage())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oheap_storage::{MemoryBlockStorage, MemoryRegion, StorageError, BLOCK_OVERHEAD};

    type MemEncryptedHeap = EncryptedHeapStorage<MemoryBlockStorage>;

    fn setup(region: &MemoryRegion) -> MemEncryptedHeap {
        let config = HeapConfig::new(16, 2).header_data(b"caller".to_vec());
        MemEncryptedHeap::setup(region, &config, &EncryptionConfig::new()).unwrap()
    }

    #[test]
    fn fresh_heap_reads_zeros() {
        let region = MemoryRegion::new();
        let heap = setup(&region);
        assert_eq!(heap.read_path(6).unwrap(), vec![vec![vec![0u8; 16]]; 3]);
        assert_eq!(heap.header_data(), b"caller");
        assert_eq!(heap.raw_storage().block_size(), 16 + BLOCK_OVERHEAD);
        assert_eq!(heap.raw_storage().block_count(), 7);
    }

    #[test]
    fn new_rejects_mismatched_key_arguments() {
        let region = MemoryRegion::new();
        let heap = setup(&region);
        let key = heap.key().clone();
        let storage = heap.heap_storage().storage().clone_device().unwrap();

        assert!(matches!(
            MemEncryptedHeap::new(HeapSource::Encrypted(storage), Some(key.clone().into())),
            Err(HeapError::Config { .. })
        ));

        let raw = heap.raw_storage().clone_device().unwrap();
        assert!(matches!(
            MemEncryptedHeap::new(HeapSource::Raw(raw), None),
            Err(HeapError::Config { .. })
        ));

        let raw = heap.raw_storage().clone_device().unwrap();
        let reopened = MemEncryptedHeap::new(HeapSource::Raw(raw), Some(key.into())).unwrap();
        assert_eq!(reopened.virtual_heap(), heap.virtual_heap());
    }

    #[test]
    fn wrong_key_fails_on_read() {
        let region = MemoryRegion::new();
        let mut heap = setup(&region);
        heap.write_bucket(0, &[vec![1u8; 16]]).unwrap();
        heap.close().unwrap();

        let heap = MemEncryptedHeap::open(
            &region,
            EncryptionKey::generate().into(),
            &OpenOptions::new(),
        )
        .unwrap();
        assert!(heap.read_path(3).unwrap_err().is_integrity());
        assert!(heap.verify_key().unwrap_err().is_integrity());
    }

    #[test]
    fn tampered_header_fails_verification() {
        let region = MemoryRegion::new();
        let heap = setup(&region);
        let key = heap.key().clone();
        heap.close().unwrap();

        // Flip a bit of the stored heap height.
        let height_offset = oheap_storage::DEVICE_PREFIX_SIZE + oheap_storage::ENCRYPTION_HEADER_SIZE + 4;
        region.with_bytes_mut(|bytes| bytes[height_offset] ^= 0x01);
        let result = MemEncryptedHeap::open(&region, key.into(), &OpenOptions::new().verify_key(true));
        assert!(result.unwrap_err().is_integrity());
    }

    #[test]
    fn storage_size_matches_region() {
        let region = MemoryRegion::new();
        let config = HeapConfig::new(16, 2).header_data(b"caller".to_vec());
        let heap = MemEncryptedHeap::setup(&region, &config, &EncryptionConfig::new()).unwrap();
        let expected = MemEncryptedHeap::compute_storage_size(&config, false).unwrap();
        assert_eq!(expected, 32 + 48 + 12 + 6 + 7 * (16 + 28));
        assert_eq!(region.len() as u64, expected);
        assert_eq!(
            MemEncryptedHeap::compute_storage_size(&config, true).unwrap(),
            7 * 44
        );
        drop(heap);
    }

    #[test]
    fn invalid_config_touches_nothing() {
        let region = MemoryRegion::new();
        let config = HeapConfig::new(16, 2).heap_base(1);
        assert!(matches!(
            MemEncryptedHeap::setup(&region, &config, &EncryptionConfig::new()),
            Err(HeapError::Config { .. })
        ));
        assert!(region.is_empty());
        assert!(!MemEncryptedHeap::exists(&region).unwrap());
    }

    #[test]
    fn short_leaf_block_rejected_before_write() {
        let region = MemoryRegion::new();
        let mut heap = setup(&region);
        let buckets = vec![
            vec![vec![0xAA; 16]],
            vec![vec![0xBB; 16]],
            vec![vec![0xCC; 15]],
        ];
        let err = heap.write_path(3, &buckets).unwrap_err();
        assert!(matches!(
            err,
            HeapError::Storage(StorageError::BlockSizeMismatch { expected: 16, actual: 15 })
        ));
        assert_eq!(heap.read_path(3).unwrap(), vec![vec![vec![0u8; 16]]; 3]);
    }

    #[test]
    fn clone_shares_plaintext() {
        let region = MemoryRegion::new();
        let mut heap = setup(&region);
        let clone = heap.clone_device().unwrap();
        heap.write_bucket(5, &[vec![5u8; 16]]).unwrap();
        assert_eq!(clone.read_bucket(5).unwrap(), vec![vec![5u8; 16]]);
        assert_eq!(clone.key(), heap.key());
    }

    #[test]
    fn header_update_survives_reopen() {
        let region = MemoryRegion::new();
        let mut heap = setup(&region);
        heap.update_header_data(b"CALLER").unwrap();
        let key = heap.key().clone();
        heap.close().unwrap();

        let heap = MemEncryptedHeap::open(&region, key.into(), &OpenOptions::new().verify_key(true))
            .unwrap();
        assert_eq!(heap.header_data(), b"CALLER");
    }
}
