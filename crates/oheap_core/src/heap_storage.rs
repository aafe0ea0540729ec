//! Bucket heap laid out over a block storage.

use crate::config::HeapConfig;
use crate::error::{HeapError, HeapResult};
use crate::header::{self, HEAP_HEADER_SIZE};
use crate::heap::VirtualHeap;
use crate::path::{Bucket, PathStorage};
use oheap_storage::{BlockDevice, BlockStorage, OpenOptions, StorageError};

/// A k-ary bucket heap stored on a block storage.
///
/// Bucket `b` occupies the contiguous blocks [`VirtualHeap::block_range`].
/// The heap shape is kept in the first 12 bytes of the storage's header, so
/// [`HeapStorage::new`] can rebuild it from any opened device.
///
/// # Example
///
/// ```rust
/// use oheap_core::{HeapConfig, HeapStorage};
/// use oheap_storage::{MemoryBlockStorage, MemoryRegion};
///
/// let region = MemoryRegion::new();
/// let mut heap =
///     HeapStorage::<MemoryBlockStorage>::setup(&region, &HeapConfig::new(8, 2)).unwrap();
/// heap.write_path(3, &[vec![vec![1; 8]], vec![vec![2; 8]], vec![vec![3; 8]]]).unwrap();
/// assert_eq!(heap.read_path(4).unwrap()[1], vec![vec![2; 8]]);
/// ```
#[derive(Debug)]
pub struct HeapStorage<S: BlockStorage> {
    storage: S,
    heap: VirtualHeap,
}

impl<S: BlockStorage> HeapStorage<S> {
    /// Wraps an opened storage, reading the heap shape from its header.
    ///
    /// # Errors
    ///
    /// Returns a format error if the header is not a heap header or the
    /// storage's block count does not match the heap.
    pub fn new(storage: S) -> HeapResult<Self> {
        let (heap, _) = header::decode(storage.header_data())?;
        if storage.block_count() != heap.block_count() {
            return Err(HeapError::invalid_format(format!(
                "storage has {} blocks, heap needs {}",
                storage.block_count(),
                heap.block_count()
            )));
        }
        Ok(Self { storage, heap })
    }

    /// Returns the heap shape.
    #[must_use]
    pub fn virtual_heap(&self) -> &VirtualHeap {
        &self.heap
    }

    /// Returns the underlying block storage.
    #[must_use]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the underlying block storage mutably.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Unwraps the underlying block storage.
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Returns the block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.storage.block_size()
    }

    /// Returns the size of one bucket in bytes.
    #[must_use]
    pub fn bucket_size(&self) -> usize {
        self.storage.block_size() * self.heap.blocks_per_bucket() as usize
    }

    /// Returns the caller header, without the heap header.
    #[must_use]
    pub fn header_data(&self) -> &[u8] {
        &self.storage.header_data()[HEAP_HEADER_SIZE..]
    }

    /// Replaces the caller header. The length must not change.
    ///
    /// # Errors
    ///
    /// Returns an error if the length differs or the write fails.
    pub fn update_header_data(&mut self, new_header: &[u8]) -> HeapResult<()> {
        let encoded = header::encode(&self.heap, new_header);
        self.storage.update_header_data(&encoded)?;
        Ok(())
    }

    /// Returns a name identifying the underlying medium.
    #[must_use]
    pub fn storage_name(&self) -> String {
        self.storage.storage_name()
    }

    /// Returns bytes written to the medium through this handle.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.storage.bytes_sent()
    }

    /// Returns bytes read from the medium through this handle.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.storage.bytes_received()
    }

    /// Reads the blocks of one bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range or a block read fails.
    pub fn read_bucket(&self, bucket: u64) -> HeapResult<Bucket> {
        let blocks = self.heap.block_range(bucket)?;
        Ok(self
            .storage
            .read_block_range(blocks.start, blocks.end - blocks.start)?)
    }

    /// Writes the blocks of one bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range, the block count is not
    /// `blocks_per_bucket`, a block is not `block_size` bytes, or a block
    /// write fails. Nothing is written when the shape is wrong.
    pub fn write_bucket(&mut self, bucket: u64, blocks: &[Vec<u8>]) -> HeapResult<()> {
        let range = self.heap.block_range(bucket)?;
        self.check_bucket_shape(blocks)?;
        self.storage.write_blocks(range.start, blocks)?;
        Ok(())
    }

    /// Reads the path from the root to `bucket`, root first.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range or a block read fails.
    pub fn read_path(&self, bucket: u64) -> HeapResult<Vec<Bucket>> {
        self.read_path_from_level(bucket, 0)
    }

    /// Reads the path to `bucket`, skipping levels above `level_start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket or level is out of range or a block
    /// read fails.
    pub fn read_path_from_level(&self, bucket: u64, level_start: u32) -> HeapResult<Vec<Bucket>> {
        let path = self.path_buckets(bucket, level_start)?;
        tracing::debug!(
            bucket,
            level_start,
            buckets = path.len(),
            storage = %self.storage.storage_name(),
            "read path"
        );
        path.into_iter().map(|b| self.read_bucket(b)).collect()
    }

    /// Writes the path from the root to `bucket`, root first.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::PathLengthMismatch`],
    /// [`HeapError::BucketSizeMismatch`] or a block size mismatch before any
    /// write if the shape of `buckets` is wrong, or any error from the block
    /// writes.
    pub fn write_path(&mut self, bucket: u64, buckets: &[Bucket]) -> HeapResult<()> {
        self.write_path_from_level(bucket, 0, buckets)
    }

    /// Writes the path to `bucket`, skipping levels above `level_start`.
    ///
    /// # Errors
    ///
    /// Same as [`HeapStorage::write_path`], plus a range error for a level
    /// deeper than the heap.
    pub fn write_path_from_level(
        &mut self,
        bucket: u64,
        level_start: u32,
        buckets: &[Bucket],
    ) -> HeapResult<()> {
        let path = self.path_buckets(bucket, level_start)?;
        if buckets.len() != path.len() {
            return Err(HeapError::PathLengthMismatch {
                expected: path.len(),
                actual: buckets.len(),
            });
        }
        for blocks in buckets {
            self.check_bucket_shape(blocks)?;
        }

        tracing::debug!(
            bucket,
            level_start,
            buckets = path.len(),
            storage = %self.storage.storage_name(),
            "write path"
        );
        for (b, blocks) in path.into_iter().zip(buckets) {
            self.write_bucket(b, blocks)?;
        }
        Ok(())
    }

    /// Flushes pending writes to the medium.
    ///
    /// # Errors
    ///
    /// Returns any error from the underlying storage.
    pub fn sync(&mut self) -> HeapResult<()> {
        self.storage.sync()?;
        Ok(())
    }

    // Buckets on the root-first path to `bucket` at levels >= level_start.
    fn path_buckets(&self, bucket: u64, level_start: u32) -> HeapResult<Vec<u64>> {
        if level_start > self.heap.heap_height() {
            return Err(HeapError::LevelOutOfRange {
                level: level_start,
                height: self.heap.heap_height(),
            });
        }
        let mut path = self.heap.path_from_root(bucket)?;
        path.drain(..(level_start as usize).min(path.len()));
        Ok(path)
    }

    fn check_bucket_shape(&self, blocks: &[Vec<u8>]) -> HeapResult<()> {
        let expected = self.heap.blocks_per_bucket() as usize;
        if blocks.len() != expected {
            return Err(HeapError::BucketSizeMismatch {
                expected,
                actual: blocks.len(),
            });
        }
        let block_size = self.storage.block_size();
        if let Some(block) = blocks.iter().find(|b| b.len() != block_size) {
            return Err(StorageError::BlockSizeMismatch {
                expected: block_size,
                actual: block.len(),
            }
            .into());
        }
        Ok(())
    }
}

impl<D: BlockDevice> HeapStorage<D> {
    /// Creates a heap device at `location`.
    ///
    /// Every block starts zeroed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any I/O if the configuration is
    /// invalid, or any error from the device setup.
    pub fn setup(location: &D::Location, config: &HeapConfig) -> HeapResult<Self> {
        let storage_config = config.block_storage_config()?;
        let device = D::setup(location, &storage_config, None)?;
        tracing::info!(
            storage = %device.storage_name(),
            heap_base = config.heap_base,
            heap_height = config.heap_height,
            blocks_per_bucket = config.blocks_per_bucket,
            block_size = config.block_size,
            "created heap storage"
        );
        Self::new(device)
    }

    /// Opens an existing heap device.
    ///
    /// # Errors
    ///
    /// Returns any error from opening the device, or a format error if it
    /// does not hold a heap.
    pub fn open(location: &D::Location, options: &OpenOptions) -> HeapResult<Self> {
        let storage = Self::new(D::open(location, options)?)?;
        tracing::info!(storage = %storage.storage_name(), "opened heap storage");
        Ok(storage)
    }

    /// Returns true if a device exists at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be queried.
    pub fn exists(location: &D::Location) -> HeapResult<bool> {
        Ok(D::exists(location)?)
    }

    /// Computes the bytes a heap device with this configuration occupies.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid or the
    /// size overflows.
    pub fn compute_storage_size(config: &HeapConfig, ignore_header: bool) -> HeapResult<u64> {
        config.validate()?;
        let heap = config.virtual_heap()?;
        Ok(D::compute_storage_size(
            config.block_size,
            heap.block_count(),
            config.device_header_len(),
            ignore_header,
        )?)
    }

    /// Opens a second, independent handle to the same device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be reopened.
    pub fn clone_device(&self) -> HeapResult<Self> {
        Ok(Self {
            storage: self.storage.clone_device()?,
            heap: self.heap,
        })
    }

    /// Closes the device, releasing its lock.
    ///
    /// # Errors
    ///
    /// Returns any error from closing the device.
    pub fn close(self) -> HeapResult<()> {
        tracing::info!(storage = %self.storage_name(), "closing heap storage");
        self.storage.close()?;
        Ok(())
    }
}

impl<S: BlockStorage> PathStorage for HeapStorage<S> {
    fn virtual_heap(&self) -> &VirtualHeap {
        &self.heap
    }

    fn read_path_from_level(&self, bucket: u64, level_start: u32) -> HeapResult<Vec<Bucket>> {
        HeapStorage::read_path_from_level(self, bucket, level_start)
    }

    fn write_path_from_level(
        &mut self,
        bucket: u64,
        level_start: u32,
        buckets: &[Bucket],
    ) -> HeapResult<()> {
        HeapStorage::write_path_from_level(self, bucket, level_start, buckets)
    }
}
