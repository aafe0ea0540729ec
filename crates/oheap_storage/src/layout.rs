//! On-device layout shared by every backend.
//!
//! ```text
//! offset  size  field
//! 0       8     magic "OHEAPDEV"
//! 8       8     block_size   (u64 LE)
//! 16      8     block_count  (u64 LE)
//! 24      4     header_len   (u32 LE)
//! 28      1     locked       (0 or 1)
//! 29      3     reserved
//! 32      ..    header_len bytes of caller header data
//! ..      ..    block_count blocks of block_size bytes
//! ```
//!
//! Block `i` starts at `32 + header_len + i * block_size`.

use crate::error::{StorageError, StorageResult};

/// Magic bytes identifying a device.
pub const DEVICE_MAGIC: [u8; 8] = *b"OHEAPDEV";
/// Size of the fixed device prefix in bytes.
pub const DEVICE_PREFIX_SIZE: usize = 32;
/// Offset of the lock flag inside the prefix.
pub(crate) const LOCK_OFFSET: usize = 28;

/// The fixed-size prefix at the start of every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePrefix {
    /// Size of every block in bytes.
    pub block_size: usize,
    /// Number of blocks.
    pub block_count: u64,
    /// Length of the caller header that follows the prefix.
    pub header_len: u32,
    /// Whether a handle currently holds the device.
    pub locked: bool,
}

impl DevicePrefix {
    /// Encodes the prefix.
    #[must_use]
    pub fn encode(&self) -> [u8; DEVICE_PREFIX_SIZE] {
        let mut out = [0u8; DEVICE_PREFIX_SIZE];
        out[0..8].copy_from_slice(&DEVICE_MAGIC);
        out[8..16].copy_from_slice(&(self.block_size as u64).to_le_bytes());
        out[16..24].copy_from_slice(&self.block_count.to_le_bytes());
        out[24..28].copy_from_slice(&self.header_len.to_le_bytes());
        out[LOCK_OFFSET] = u8::from(self.locked);
        out
    }

    /// Decodes a prefix from the first bytes of a device.
    ///
    /// # Errors
    ///
    /// Returns an invalid format error if the bytes are too short, the magic
    /// does not match or a field is out of range.
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() < DEVICE_PREFIX_SIZE {
            return Err(StorageError::invalid_format(format!(
                "device prefix too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..8] != DEVICE_MAGIC {
            return Err(StorageError::invalid_format("bad device magic"));
        }

        let block_size = u64::from_le_bytes(read_array(&bytes[8..16]));
        let block_count = u64::from_le_bytes(read_array(&bytes[16..24]));
        let header_len = u32::from_le_bytes(read_array(&bytes[24..28]));
        let locked = match bytes[LOCK_OFFSET] {
            0 => false,
            1 => true,
            other => {
                return Err(StorageError::invalid_format(format!(
                    "bad lock flag {other:#04x}"
                )))
            }
        };

        let block_size = usize::try_from(block_size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| StorageError::invalid_format(format!("bad block size {block_size}")))?;

        Ok(Self {
            block_size,
            block_count,
            header_len,
            locked,
        })
    }

    /// Bytes before the first block: prefix plus caller header.
    #[must_use]
    pub fn header_size(&self) -> u64 {
        DEVICE_PREFIX_SIZE as u64 + u64::from(self.header_len)
    }

    /// Byte offset of block `index`.
    #[must_use]
    pub fn block_offset(&self, index: u64) -> u64 {
        self.header_size() + index * self.block_size as u64
    }

    /// Total size of the device in bytes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the size overflows `u64`.
    pub fn storage_size(&self) -> StorageResult<u64> {
        storage_size(
            self.block_size,
            self.block_count,
            self.header_len as usize,
            false,
        )
    }
}

/// Computes the total device size in bytes.
///
/// With `ignore_header` only the block area is counted.
///
/// # Errors
///
/// Returns a configuration error if the size overflows `u64`.
pub fn storage_size(
    block_size: usize,
    block_count: u64,
    header_len: usize,
    ignore_header: bool,
) -> StorageResult<u64> {
    let blocks = (block_size as u64)
        .checked_mul(block_count)
        .ok_or_else(|| overflow(block_size, block_count))?;
    if ignore_header {
        return Ok(blocks);
    }
    blocks
        .checked_add(DEVICE_PREFIX_SIZE as u64 + header_len as u64)
        .ok_or_else(|| overflow(block_size, block_count))
}

fn overflow(block_size: usize, block_count: u64) -> StorageError {
    StorageError::config(format!(
        "device of {block_count} blocks of {block_size} bytes is too large"
    ))
}

pub(crate) fn check_index(index: u64, block_count: u64) -> StorageResult<()> {
    if index >= block_count {
        return Err(StorageError::OutOfRange { index, block_count });
    }
    Ok(())
}

pub(crate) fn check_range(start: u64, count: u64, block_count: u64) -> StorageResult<()> {
    match start.checked_add(count) {
        Some(end) if end <= block_count => Ok(()),
        _ => Err(StorageError::OutOfRange {
            index: start.saturating_add(count.saturating_sub(1)),
            block_count,
        }),
    }
}

pub(crate) fn check_block_len(len: usize, block_size: usize) -> StorageResult<()> {
    if len != block_size {
        return Err(StorageError::BlockSizeMismatch {
            expected: block_size,
            actual: len,
        });
    }
    Ok(())
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
