//! File-based block device.

use crate::backend::{BlockDevice, BlockInitializer, BlockStorage};
use crate::config::{BlockStorageConfig, OpenOptions};
use crate::error::{StorageError, StorageResult};
use crate::layout::{self, DevicePrefix, DEVICE_PREFIX_SIZE, LOCK_OFFSET};
use crate::stats::IoStats;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A block device stored in a single regular file.
///
/// The file is exactly [`BlockDevice::compute_storage_size`] bytes long and
/// follows the layout in [`crate::layout`].
///
/// # Thread Safety
///
/// Reads go through an internal lock and may be issued from several threads.
/// For parallel path operations prefer one [`clone_device`] per worker: each
/// clone has its own file descriptor.
///
/// [`clone_device`]: BlockDevice::clone_device
///
/// # Example
///
/// ```no_run
/// use oheap_storage::{BlockDevice, BlockStorage, BlockStorageConfig, FileBlockStorage};
/// use std::path::PathBuf;
///
/// let path = PathBuf::from("heap.bin");
/// let mut device = FileBlockStorage::setup(&path, &BlockStorageConfig::new(64, 16), None).unwrap();
/// device.write_block(3, &[7u8; 64]).unwrap();
/// assert_eq!(device.read_block(3).unwrap(), vec![7u8; 64]);
/// device.close().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBlockStorage {
    path: PathBuf,
    file: Mutex<File>,
    prefix: DevicePrefix,
    header_data: Vec<u8>,
    stats: IoStats,
    owns_lock: bool,
}

impl FileBlockStorage {
    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_device(
        path: &Path,
        config: &BlockStorageConfig,
        initializer: Option<&BlockInitializer<'_>>,
        total_size: u64,
    ) -> StorageResult<()> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.allocate(total_size)?;

        let prefix = DevicePrefix {
            block_size: config.block_size,
            block_count: config.block_count,
            header_len: config.header_data.len() as u32,
            locked: false,
        };

        let mut writer = BufWriter::new(file);
        writer.write_all(&prefix.encode())?;
        writer.write_all(&config.header_data)?;

        let zeros = vec![0u8; config.block_size];
        for index in 0..config.block_count {
            match initializer {
                Some(init) => {
                    let block = init(index)?;
                    layout::check_block_len(block.len(), config.block_size)?;
                    writer.write_all(&block)?;
                }
                None => writer.write_all(&zeros)?,
            }
            config.report_progress(1);
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.set_len(total_size)?;
        file.sync_all()?;
        Ok(())
    }

    fn set_lock_flag(&self, locked: bool) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(LOCK_OFFSET as u64))?;
        file.write_all(&[u8::from(locked)])?;
        file.sync_data()?;
        Ok(())
    }

    fn release_lock(&mut self) -> StorageResult<()> {
        if self.owns_lock {
            self.set_lock_flag(false)?;
            self.owns_lock = false;
            tracing::debug!(path = %self.path.display(), "released device lock");
        }
        Ok(())
    }
}

impl BlockStorage for FileBlockStorage {
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
        self.path.display().to_string()
    }

    fn read_block(&self, index: u64) -> StorageResult<Vec<u8>> {
        layout::check_index(index, self.prefix.block_count)?;

        let mut buffer = vec![0u8; self.prefix.block_size];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.prefix.block_offset(index)))?;
            file.read_exact(&mut buffer)?;
        }
        self.stats.record_received(buffer.len());
        tracing::trace!(index, "read block");

        Ok(buffer)
    }

    fn read_block_range(&self, start: u64, count: u64) -> StorageResult<Vec<Vec<u8>>> {
        layout::check_range(start, count, self.prefix.block_count)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let block_size = self.prefix.block_size;
        let mut buffer = vec![0u8; block_size * count as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.prefix.block_offset(start)))?;
            file.read_exact(&mut buffer)?;
        }
        self.stats.record_received(buffer.len());
        tracing::trace!(start, count, "read block range");

        Ok(buffer.chunks(block_size).map(<[u8]>::to_vec).collect())
    }

    fn write_block(&mut self, index: u64, data: &[u8]) -> StorageResult<()> {
        layout::check_index(index, self.prefix.block_count)?;
        layout::check_block_len(data.len(), self.prefix.block_size)?;

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(self.prefix.block_offset(index)))?;
        file.write_all(data)?;
        self.stats.record_sent(data.len());
        tracing::trace!(index, "wrote block");

        Ok(())
    }

    fn write_blocks(&mut self, start: u64, blocks: &[Vec<u8>]) -> StorageResult<()> {
        layout::check_range(start, blocks.len() as u64, self.prefix.block_count)?;
        let block_size = self.prefix.block_size;
        let mut buffer = Vec::with_capacity(block_size * blocks.len());
        for block in blocks {
            layout::check_block_len(block.len(), block_size)?;
            buffer.extend_from_slice(block);
        }
        if buffer.is_empty() {
            return Ok(());
        }

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(self.prefix.block_offset(start)))?;
        file.write_all(&buffer)?;
        self.stats.record_sent(buffer.len());

        Ok(())
    }

    fn update_header_data(&mut self, new_header: &[u8]) -> StorageResult<()> {
        if new_header.len() != self.header_data.len() {
            return Err(StorageError::HeaderSizeMismatch {
                expected: self.header_data.len(),
                actual: new_header.len(),
            });
        }

        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(DEVICE_PREFIX_SIZE as u64))?;
        file.write_all(new_header)?;
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
        let file = self.file.get_mut();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

impl BlockDevice for FileBlockStorage {
    type Location = PathBuf;

    fn setup(
        location: &PathBuf,
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
        if location.exists() && !config.ignore_existing {
            return Err(StorageError::AlreadyExists {
                name: location.display().to_string(),
            });
        }

        if let Err(e) = Self::write_device(location, config, initializer, total_size) {
            // Don't leave a half-initialized device behind.
            let _ = fs::remove_file(location);
            return Err(e);
        }

        tracing::info!(
            path = %location.display(),
            block_size = config.block_size,
            block_count = config.block_count,
            total_size,
            "created file device"
        );

        Self::open(location, &OpenOptions::default())
    }

    fn open(location: &PathBuf, options: &OpenOptions) -> StorageResult<Self> {
        let mut file = match fs::OpenOptions::new().read(true).write(true).open(location) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(location.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut prefix_bytes = [0u8; DEVICE_PREFIX_SIZE];
        file.read_exact(&mut prefix_bytes)
            .map_err(|_| StorageError::invalid_format("file too short for device prefix"))?;
        let prefix = DevicePrefix::decode(&prefix_bytes)?;

        let expected = prefix.storage_size()?;
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(StorageError::invalid_format(format!(
                "file is {actual} bytes, expected {expected}"
            )));
        }

        let mut header_data = vec![0u8; prefix.header_len as usize];
        file.read_exact(&mut header_data)
            .map_err(|_| StorageError::invalid_format("file too short for header data"))?;

        if prefix.locked {
            if !options.ignore_lock {
                return Err(StorageError::Locked {
                    name: location.display().to_string(),
                });
            }
            tracing::warn!(path = %location.display(), "opening locked device, lock ignored");
        }

        let mut storage = Self {
            path: location.clone(),
            file: Mutex::new(file),
            prefix,
            header_data,
            stats: IoStats::new(),
            owns_lock: false,
        };

        if !options.ignore_lock {
            storage.set_lock_flag(true)?;
            storage.owns_lock = true;
        }

        tracing::debug!(
            path = %location.display(),
            block_count = prefix.block_count,
            locked = storage.owns_lock,
            "opened file device"
        );

        Ok(storage)
    }

    fn exists(location: &PathBuf) -> StorageResult<bool> {
        Ok(location.is_file())
    }

    fn location(&self) -> &PathBuf {
        &self.path
    }

    fn close(mut self) -> StorageResult<()> {
        self.sync()?;
        self.release_lock()?;
        tracing::info!(path = %self.path.display(), "closed file device");
        Ok(())
    }
}

impl Drop for FileBlockStorage {
    fn drop(&mut self) {
        if let Err(e) = self.release_lock() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release device lock");
        }
    }
}
