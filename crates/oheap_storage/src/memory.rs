//! In-memory block device for testing.

use crate::backend::{BlockDevice, BlockInitializer, BlockStorage};
use crate::config::{BlockStorageConfig, OpenOptions};
use crate::error::{StorageError, StorageResult};
use crate::layout::{self, DevicePrefix, DEVICE_PREFIX_SIZE, LOCK_OFFSET};
use crate::stats::IoStats;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A shared byte region holding one device image.
///
/// Cloning a region yields another reference to the same bytes, the way two
/// paths can name the same file.
#[derive(Clone, Default)]
pub struct MemoryRegion {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl MemoryRegion {
    /// Creates an empty region.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current size of the region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    /// Returns true if the region holds no device.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.read().is_empty()
    }

    /// Returns a copy of the raw device image.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Runs `f` with mutable access to the raw device image.
    ///
    /// Useful for simulating corruption in tests.
    pub fn with_bytes_mut<T>(&self, f: impl FnOnce(&mut Vec<u8>) -> T) -> T {
        f(&mut self.bytes.write())
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("len", &self.len())
            .finish()
    }
}

/// A block device held in a [`MemoryRegion`].
///
/// Uses the same byte layout as [`super::FileBlockStorage`], so a region
/// snapshot can be written to disk and opened as a file device.
///
/// # Example
///
/// ```rust
/// use oheap_storage::{BlockDevice, BlockStorage, BlockStorageConfig, MemoryBlockStorage, MemoryRegion};
///
/// let region = MemoryRegion::new();
/// let mut device = MemoryBlockStorage::setup(&region, &BlockStorageConfig::new(8, 4), None).unwrap();
/// device.write_block(2, b"abcdefgh").unwrap();
/// assert_eq!(device.read_block(2).unwrap(), b"abcdefgh");
/// ```
#[derive(Debug)]
pub struct MemoryBlockStorage {
    region: MemoryRegion,
    prefix: DevicePrefix,
    header_data: Vec<u8>,
    stats: IoStats,
    owns_lock: bool,
}

impl MemoryBlockStorage {
    /// Returns the region backing this device.
    #[must_use]
    pub fn region(&self) -> &MemoryRegion {
        &self.region
    }

    fn block_slice_range(&self, start: u64, count: u64) -> std::ops::Range<usize> {
        let begin = self.prefix.block_offset(start) as usize;
        begin..begin + count as usize * self.prefix.block_size
    }

    fn release_lock(&mut self) {
        if self.owns_lock {
            self.region.bytes.write()[LOCK_OFFSET] = 0;
            self.owns_lock = false;
        }
    }
}

impl BlockStorage for MemoryBlockStorage {
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
        format!("memory:{:p}", Arc::as_ptr(&self.region.bytes))
    }

    fn read_block(&self, index: u64) -> StorageResult<Vec<u8>> {
        layout::check_index(index, self.prefix.block_count)?;
        let range = self.block_slice_range(index, 1);
        let block = self.region.bytes.read()[range].to_vec();
        self.stats.record_received(block.len());
        Ok(block)
    }

    fn read_block_range(&self, start: u64, count: u64) -> StorageResult<Vec<Vec<u8>>> {
        layout::check_range(start, count, self.prefix.block_count)?;
        let range = self.block_slice_range(start, count);
        let bytes = self.region.bytes.read();
        let blocks: Vec<Vec<u8>> = bytes[range]
            .chunks(self.prefix.block_size)
            .map(<[u8]>::to_vec)
            .collect();
        self.stats
            .record_received(blocks.len() * self.prefix.block_size);
        Ok(blocks)
    }

    fn write_block(&mut self, index: u64, data: &[u8]) -> StorageResult<()> {
        layout::check_index(index, self.prefix.block_count)?;
        layout::check_block_len(data.len(), self.prefix.block_size)?;
        let range = self.block_slice_range(index, 1);
        self.region.bytes.write()[range].copy_from_slice(data);
        self.stats.record_sent(data.len());
        Ok(())
    }

    fn update_header_data(&mut self, new_header: &[u8]) -> StorageResult<()> {
        if new_header.len() != self.header_data.len() {
            return Err(StorageError::HeaderSizeMismatch {
                expected: self.header_data.len(),
                actual: new_header.len(),
            });
        }
        let start = DEVICE_PREFIX_SIZE;
        self.region.bytes.write()[start..start + new_header.len()].copy_from_slice(new_header);
        self.stats.record_sent(new_header.len());
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
        // In-memory device has no pending writes
        Ok(())
    }
}

impl BlockDevice for MemoryBlockStorage {
    type Location = MemoryRegion;

    fn setup(
        location: &MemoryRegion,
        config: &BlockStorageConfig,
        initializer: Option<&BlockInitializer<'_>>,
    ) -> StorageResult<Self> {
        config.validate()?;
        let total_size = layout::storage_size(
            config.block_size,
            config.block_count,
            config.header_data.len(),
            false,
        )?;
        let total_size = usize::try_from(total_size)
            .map_err(|_| StorageError::config("device does not fit in memory"))?;
        if !location.is_empty() && !config.ignore_existing {
            return Err(StorageError::AlreadyExists {
                name: "memory region".to_string(),
            });
        }

        let prefix = DevicePrefix {
            block_size: config.block_size,
            block_count: config.block_count,
            header_len: config.header_data.len() as u32,
            locked: false,
        };
        let mut image = Vec::with_capacity(total_size);
        image.extend_from_slice(&prefix.encode());
        image.extend_from_slice(&config.header_data);
        for index in 0..config.block_count {
            match initializer {
                Some(init) => {
                    let block = init(index)?;
                    layout::check_block_len(block.len(), config.block_size)?;
                    image.extend_from_slice(&block);
                }
                None => image.resize(image.len() + config.block_size, 0),
            }
            config.report_progress(1);
        }
        debug_assert_eq!(image.len(), total_size);

        *location.bytes.write() = image;
        tracing::debug!(
            block_size = config.block_size,
            block_count = config.block_count,
            "created memory device"
        );

        Self::open(location, &OpenOptions::default())
    }

    fn open(location: &MemoryRegion, options: &OpenOptions) -> StorageResult<Self> {
        let mut bytes = location.bytes.write();
        if bytes.is_empty() {
            return Err(StorageError::not_found("memory region"));
        }

        let prefix = DevicePrefix::decode(&bytes)?;
        let expected = prefix.storage_size()?;
        if bytes.len() as u64 != expected {
            return Err(StorageError::invalid_format(format!(
                "region is {} bytes, expected {expected}",
                bytes.len()
            )));
        }
        let header_start = DEVICE_PREFIX_SIZE;
        let header_data = bytes[header_start..header_start + prefix.header_len as usize].to_vec();

        if prefix.locked {
            if !options.ignore_lock {
                return Err(StorageError::Locked {
                    name: "memory region".to_string(),
                });
            }
            tracing::warn!("opening locked memory device, lock ignored");
        }
        if !options.ignore_lock {
            bytes[LOCK_OFFSET] = 1;
        }
        drop(bytes);

        Ok(Self {
            region: location.clone(),
            prefix,
            header_data,
            stats: IoStats::new(),
            owns_lock: !options.ignore_lock,
        })
    }

    fn exists(location: &MemoryRegion) -> StorageResult<bool> {
        Ok(!location.is_empty())
    }

    fn location(&self) -> &MemoryRegion {
        &self.region
    }

    fn close(mut self) -> StorageResult<()> {
        self.release_lock();
        Ok(())
    }
}

impl Drop for MemoryBlockStorage {
    fn drop(&mut self) {
        self.release_lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(region: &MemoryRegion) -> MemoryBlockStorage {
        let config = BlockStorageConfig::new(8, 4).header_data(b"meta".to_vec());
        MemoryBlockStorage::setup(region, &config, None).unwrap()
    }

    #[test]
    fn memory_write_and_read() {
        let region = MemoryRegion::new();
        let mut device = setup(&region);

        device.write_block(0, b"aaaaaaaa").unwrap();
        device.write_block(3, b"dddddddd").unwrap();

        assert_eq!(device.read_block(0).unwrap(), b"aaaaaaaa");
        assert_eq!(device.read_block(1).unwrap(), vec![0u8; 8]);
        assert_eq!(device.read_block(3).unwrap(), b"dddddddd");
        assert_eq!(device.header_data(), b"meta");
    }

    #[test]
    fn memory_layout_matches_file_layout() {
        let region = MemoryRegion::new();
        let mut device = setup(&region);
        device.write_block(1, b"12345678").unwrap();

        let image = region.snapshot();
        assert_eq!(image.len() as u64, MemoryBlockStorage::compute_storage_size(8, 4, 4, false).unwrap());
        assert_eq!(&image[0..8], b"OHEAPDEV");
        assert_eq!(&image[32..36], b"meta");
        let offset = 32 + 4 + 8;
        assert_eq!(&image[offset..offset + 8], b"12345678");
    }

    #[test]
    fn memory_out_of_range() {
        let region = MemoryRegion::new();
        let device = setup(&region);
        assert!(device.read_block(4).unwrap_err().is_out_of_range());
        assert!(device.read_block(u64::MAX).unwrap_err().is_out_of_range());
    }

    #[test]
    fn memory_clone_sees_writes() {
        let region = MemoryRegion::new();
        let mut device = setup(&region);
        let clone = device.clone_device().unwrap();

        device.write_block(2, b"cccccccc").unwrap();
        assert_eq!(clone.read_block(2).unwrap(), b"cccccccc");
    }

    #[test]
    fn memory_lock() {
        let region = MemoryRegion::new();
        let device = setup(&region);
        assert!(matches!(
            MemoryBlockStorage::open(&region, &OpenOptions::default()),
            Err(StorageError::Locked { .. })
        ));
        device.close().unwrap();
        assert!(MemoryBlockStorage::open(&region, &OpenOptions::default()).is_ok());
    }

    #[test]
    fn memory_existing_protected() {
        let region = MemoryRegion::new();
        drop(setup(&region));
        let config = BlockStorageConfig::new(8, 4);
        assert!(matches!(
            MemoryBlockStorage::setup(&region, &config, None),
            Err(StorageError::AlreadyExists { .. })
        ));
        assert!(MemoryBlockStorage::setup(&region, &config.ignore_existing(true), None).is_ok());
    }

    #[test]
    fn memory_open_empty_region() {
        let region = MemoryRegion::new();
        assert!(!MemoryBlockStorage::exists(&region).unwrap());
        assert!(matches!(
            MemoryBlockStorage::open(&region, &OpenOptions::default()),
            Err(StorageError::NotFound { .. })
        ));
    }
}
