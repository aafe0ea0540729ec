//! Heap setup configuration.

use crate::error::{HeapError, HeapResult};
use crate::header::{self, HEAP_HEADER_SIZE};
use crate::heap::VirtualHeap;
use oheap_storage::{BlockStorageConfig, ProgressSink};
use std::fmt;
use std::sync::Arc;

/// Configuration for creating a heap device.
///
/// The number of blocks is derived from the heap shape and is not part of
/// the configuration.
///
/// # Example
///
/// ```rust
/// use oheap_core::HeapConfig;
///
/// let config = HeapConfig::new(64, 3).blocks_per_bucket(4);
/// assert_eq!(config.virtual_heap().unwrap().block_count(), 60);
/// ```
#[derive(Clone)]
pub struct HeapConfig {
    /// Size of every block in bytes.
    pub block_size: usize,

    /// Height of the heap. A single bucket has height 0.
    pub heap_height: u32,

    /// Blocks per bucket.
    ///
    /// Default: 1
    pub blocks_per_bucket: u32,

    /// Branching factor of the heap.
    ///
    /// Default: 2
    pub heap_base: u32,

    /// Caller header bytes stored after the heap header.
    pub header_data: Vec<u8>,

    /// Overwrite an existing device at the same location instead of failing.
    pub ignore_existing: bool,

    /// Optional observer for block initialization progress.
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl HeapConfig {
    /// Creates a binary heap configuration with one block per bucket.
    #[must_use]
    pub fn new(block_size: usize, heap_height: u32) -> Self {
        Self {
            block_size,
            heap_height,
            blocks_per_bucket: 1,
            heap_base: 2,
            header_data: Vec::new(),
            ignore_existing: false,
            progress: None,
        }
    }

    /// Sets the number of blocks per bucket.
    #[must_use]
    pub fn blocks_per_bucket(mut self, value: u32) -> Self {
        self.blocks_per_bucket = value;
        self
    }

    /// Sets the branching factor.
    #[must_use]
    pub fn heap_base(mut self, value: u32) -> Self {
        self.heap_base = value;
        self
    }

    /// Sets the caller header bytes.
    #[must_use]
    pub fn header_data(mut self, header_data: impl Into<Vec<u8>>) -> Self {
        self.header_data = header_data.into();
        self
    }

    /// Sets whether an existing device may be overwritten.
    #[must_use]
    pub fn ignore_existing(mut self, value: bool) -> Self {
        self.ignore_existing = value;
        self
    }

    /// Sets the progress observer.
    #[must_use]
    pub fn progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Returns the heap shape this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the shape is invalid.
    pub fn virtual_heap(&self) -> HeapResult<VirtualHeap> {
        VirtualHeap::new(self.heap_base, self.heap_height, self.blocks_per_bucket)
    }

    /// Checks every parameter without touching storage.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid heap shape or a zero
    /// block size.
    pub fn validate(&self) -> HeapResult<()> {
        self.virtual_heap()?;
        if self.block_size == 0 {
            return Err(HeapError::config("block size must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the header length on the block device: heap header plus
    /// caller header.
    #[must_use]
    pub fn device_header_len(&self) -> usize {
        HEAP_HEADER_SIZE + self.header_data.len()
    }

    /// Builds the block device configuration for this heap.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the heap configuration is invalid.
    pub fn block_storage_config(&self) -> HeapResult<BlockStorageConfig> {
        self.validate()?;
        let heap = self.virtual_heap()?;
        let mut config = BlockStorageConfig::new(self.block_size, heap.block_count())
            .header_data(header::encode(&heap, &self.header_data))
            .ignore_existing(self.ignore_existing);
        if let Some(sink) = &self.progress {
            config = config.progress(Arc::clone(sink));
        }
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for HeapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapConfig")
            .field("block_size", &self.block_size)
            .field("heap_height", &self.heap_height)
            .field("blocks_per_bucket", &self.blocks_per_bucket)
            .field("heap_base", &self.heap_base)
            .field("header_len", &self.header_data.len())
            .field("ignore_existing", &self.ignore_existing)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HeapConfig::new(32, 2);
        assert_eq!(config.blocks_per_bucket, 1);
        assert_eq!(config.heap_base, 2);
        assert!(config.header_data.is_empty());
        assert!(!config.ignore_existing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn block_storage_config_derives_count() {
        let config = HeapConfig::new(64, 3)
            .blocks_per_bucket(2)
            .header_data(b"app".to_vec())
            .ignore_existing(true);
        let storage = config.block_storage_config().unwrap();
        assert_eq!(storage.block_size, 64);
        assert_eq!(storage.block_count, 30);
        assert_eq!(storage.header_data.len(), HEAP_HEADER_SIZE + 3);
        assert_eq!(&storage.header_data[HEAP_HEADER_SIZE..], b"app");
        assert!(storage.ignore_existing);
    }

    #[test]
    fn invalid_configs() {
        assert!(matches!(
            HeapConfig::new(0, 2).validate(),
            Err(HeapError::Config { .. })
        ));
        assert!(matches!(
            HeapConfig::new(16, 2).heap_base(1).validate(),
            Err(HeapError::Config { .. })
        ));
        assert!(matches!(
            HeapConfig::new(16, 2).blocks_per_bucket(0).validate(),
            Err(HeapError::Config { .. })
        ));
        assert!(matches!(
            HeapConfig::new(16, 70).validate(),
            Err(HeapError::Config { .. })
        ));
    }
}
