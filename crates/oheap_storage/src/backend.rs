//! Block storage trait definitions.

use crate::config::{BlockStorageConfig, OpenOptions};
use crate::error::StorageResult;
use crate::layout;
use std::fmt;

/// Produces the initial contents of block `index` during setup.
pub type BlockInitializer<'a> = dyn Fn(u64) -> StorageResult<Vec<u8>> + 'a;

/// Fixed-size block I/O over an opened device.
///
/// Blocks are addressed by a dense index in `[0, block_count)` and are always
/// read and written whole.
///
/// # Invariants
///
/// - `read_block(i)` returns exactly the bytes last written by `write_block(i, ..)`
/// - every block has exactly `block_size` bytes; the size never changes
/// - `header_data` returns the caller header bytes unmodified
///
/// # Implementors
///
/// - [`super::FileBlockStorage`] - a single local file
/// - [`super::MemoryBlockStorage`] - a shared in-memory region
/// - [`super::ObjectStoreBlockStorage`] - one object per block
/// - [`super::EncryptedBlockStorage`] - authenticated encryption over any device
pub trait BlockStorage: Send + Sync {
    /// Returns the size of every block in bytes.
    fn block_size(&self) -> usize;

    /// Returns the number of blocks.
    fn block_count(&self) -> u64;

    /// Returns the caller header bytes written at setup.
    fn header_data(&self) -> &[u8];

    /// Returns a human-readable name for the device.
    fn storage_name(&self) -> String;

    /// Reads block `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `index` is not in `[0, block_count)`
    /// - the stored block fails verification (encrypted storage)
    /// - an I/O error occurs
    fn read_block(&self, index: u64) -> StorageResult<Vec<u8>>;

    /// Writes block `index`. `data` must be exactly `block_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range, the length is wrong or
    /// an I/O error occurs.
    fn write_block(&mut self, index: u64, data: &[u8]) -> StorageResult<()>;

    /// Reads the blocks at the given indices, in order.
    ///
    /// # Errors
    ///
    /// Fails on the first block that cannot be read.
    fn read_blocks(&self, indices: &[u64]) -> StorageResult<Vec<Vec<u8>>> {
        indices.iter().map(|&index| self.read_block(index)).collect()
    }

    /// Reads `count` consecutive blocks starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an out-of-range error if the run does not fit the device.
    fn read_block_range(&self, start: u64, count: u64) -> StorageResult<Vec<Vec<u8>>> {
        layout::check_range(start, count, self.block_count())?;
        (start..start + count)
            .map(|index| self.read_block(index))
            .collect()
    }

    /// Writes consecutive blocks starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an out-of-range error if the run does not fit the device, or
    /// the first error from a block write.
    fn write_blocks(&mut self, start: u64, blocks: &[Vec<u8>]) -> StorageResult<()> {
        layout::check_range(start, blocks.len() as u64, self.block_count())?;
        for (index, block) in (start..).zip(blocks) {
            self.write_block(index, block)?;
        }
        Ok(())
    }

    /// Replaces the caller header. The new header must have the same length.
    ///
    /// # Errors
    ///
    /// Returns a header size mismatch error if the length differs.
    fn update_header_data(&mut self, new_header: &[u8]) -> StorageResult<()>;

    /// Total bytes this handle wrote to its medium.
    fn bytes_sent(&self) -> u64;

    /// Total bytes this handle read from its medium.
    fn bytes_received(&self) -> u64;

    /// Flushes written blocks to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn sync(&mut self) -> StorageResult<()>;
}

/// Lifecycle of a concrete device: creation, opening and cloning.
///
/// Each handle owns its connection to the medium exclusively;
/// [`clone_device`](Self::clone_device) is the only way to obtain a second,
/// independent handle to the same bytes.
pub trait BlockDevice: BlockStorage + Sized {
    /// Where the device lives (a path, a memory region, a store and prefix).
    type Location: Clone + fmt::Debug + Send + Sync;

    /// Creates a new device, writes its header and initializes every block,
    /// then opens it.
    ///
    /// Blocks are filled with zeros unless `initializer` is given.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any I/O if the configuration is
    /// invalid, or `AlreadyExists` if a device exists and
    /// `config.ignore_existing` is not set.
    fn setup(
        location: &Self::Location,
        config: &BlockStorageConfig,
        initializer: Option<&BlockInitializer<'_>>,
    ) -> StorageResult<Self>;

    /// Opens an existing device.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no device, `Locked` if another handle
    /// holds it and `options.ignore_lock` is not set, or `InvalidFormat` if
    /// the stored header is damaged.
    fn open(location: &Self::Location, options: &OpenOptions) -> StorageResult<Self>;

    /// Returns true if a device exists at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the medium cannot be queried.
    fn exists(location: &Self::Location) -> StorageResult<bool>;

    /// Returns where this device lives.
    fn location(&self) -> &Self::Location;

    /// Computes the bytes a device with these parameters occupies.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the size overflows.
    fn compute_storage_size(
        block_size: usize,
        block_count: u64,
        header_len: usize,
        ignore_header: bool,
    ) -> StorageResult<u64> {
        layout::storage_size(block_size, block_count, header_len, ignore_header)
    }

    /// Opens a second, independent handle to the same device.
    ///
    /// The clone ignores the device lock and never releases it.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be reopened.
    fn clone_device(&self) -> StorageResult<Self> {
        Self::open(self.location(), &OpenOptions::new().ignore_lock(true))
    }

    /// Syncs the device and releases its lock if this handle holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync or unlock fails.
    fn close(self) -> StorageResult<()>;
}
