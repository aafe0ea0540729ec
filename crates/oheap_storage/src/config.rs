//! Device setup and open configuration.

use crate::error::{StorageError, StorageResult};
use std::fmt;
use std::sync::Arc;

/// Receives progress notifications from long-running bulk operations.
///
/// Setup reports one unit per initialized block; object store `clear`
/// reports one unit per removed object.
pub trait ProgressSink: Send + Sync {
    /// Called after `n` more units of work completed.
    fn on_progress(&self, n: u64);
}

/// Configuration for creating a new block device.
#[derive(Clone)]
pub struct BlockStorageConfig {
    /// Size of every block in bytes. Must be non-zero.
    pub block_size: usize,

    /// Number of blocks on the device.
    pub block_count: u64,

    /// Caller header bytes stored unencrypted at the front of the device.
    pub header_data: Vec<u8>,

    /// Overwrite an existing device at the same location instead of failing.
    pub ignore_existing: bool,

    /// Optional observer for block initialization progress.
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl BlockStorageConfig {
    /// Creates a configuration with no header data.
    #[must_use]
    pub fn new(block_size: usize, block_count: u64) -> Self {
        Self {
            block_size,
            block_count,
            header_data: Vec::new(),
            ignore_existing: false,
            progress: None,
        }
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

    /// Checks the parameters without touching storage.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the block size is zero or the header
    /// does not fit the on-device length field.
    pub fn validate(&self) -> StorageResult<()> {
        if self.block_size == 0 {
            return Err(StorageError::config("block size must be greater than zero"));
        }
        if u32::try_from(self.header_data.len()).is_err() {
            return Err(StorageError::config(format!(
                "header data of {} bytes is too large",
                self.header_data.len()
            )));
        }
        Ok(())
    }

    pub(crate) fn report_progress(&self, n: u64) {
        if let Some(sink) = &self.progress {
            sink.on_progress(n);
        }
    }
}

impl fmt::Debug for BlockStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStorageConfig")
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("header_len", &self.header_data.len())
            .field("ignore_existing", &self.ignore_existing)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Options for opening an existing device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Open even if another handle holds the device lock. The handle then
    /// neither takes nor releases the lock.
    pub ignore_lock: bool,

    /// Check the key against the stored key-check value while opening an
    /// encrypted device. Raw devices ignore this flag.
    pub verify_key: bool,
}

impl OpenOptions {
    /// Creates the default options: take the lock, don't verify the key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the device lock is ignored.
    #[must_use]
    pub const fn ignore_lock(mut self, value: bool) -> Self {
        self.ignore_lock = value;
        self
    }

    /// Sets whether the key is verified on open.
    #[must_use]
    pub const fn verify_key(mut self, value: bool) -> Self {
        self.verify_key = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Counter(AtomicU64);

    impl ProgressSink for Counter {
        fn on_progress(&self, n: u64) {
            self.0.fetch_add(n, Ordering::Relaxed);
        }
    }

    #[test]
    fn zero_block_size_rejected() {
        let config = BlockStorageConfig::new(0, 4);
        assert!(matches!(config.validate(), Err(StorageError::Config { .. })));
    }

    #[test]
    fn builder_pattern() {
        let config = BlockStorageConfig::new(64, 8)
            .header_data(b"abc".to_vec())
            .ignore_existing(true);

        assert_eq!(config.block_size, 64);
        assert_eq!(config.block_count, 8);
        assert_eq!(config.header_data, b"abc");
        assert!(config.ignore_existing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn progress_is_forwarded() {
        let counter = Arc::new(Counter::default());
        let config = BlockStorageConfig::new(16, 2).progress(counter.clone());
        config.report_progress(3);
        config.report_progress(1);
        assert_eq!(counter.0.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn default_open_options() {
        let options = OpenOptions::new();
        assert!(!options.ignore_lock);
        assert!(!options.verify_key);

        let options = OpenOptions::new().ignore_lock(true).verify_key(true);
        assert!(options.ignore_lock);
        assert!(options.verify_key);
    }
}
