//! Error types for block storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred on the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid setup or open parameters. Raised before any I/O happens.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// A block index outside `[0, block_count)`.
    #[error("block index {index} out of range (block count {block_count})")]
    OutOfRange {
        /// The requested block index.
        index: u64,
        /// Number of blocks on the device.
        block_count: u64,
    },

    /// Block data does not have the device's block size.
    #[error("block size mismatch: expected {expected} bytes, got {actual}")]
    BlockSizeMismatch {
        /// The device block size.
        expected: usize,
        /// The length that was supplied.
        actual: usize,
    },

    /// Replacement header data does not have the length of the original.
    #[error("header size mismatch: expected {expected} bytes, got {actual}")]
    HeaderSizeMismatch {
        /// Length of the stored header.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// A stored block or header failed authentication.
    ///
    /// Signals corruption, tampering, a wrong key or a block read at the
    /// wrong position. Never downgraded to a generic I/O error.
    #[error("integrity check failed: {message}")]
    Integrity {
        /// What failed to verify.
        message: String,
    },

    /// The device is held by another handle.
    #[error("storage locked: {name} is already open (use ignore_lock to override)")]
    Locked {
        /// Name of the locked device.
        name: String,
    },

    /// Setup would overwrite an existing device.
    #[error("storage already exists: {name}")]
    AlreadyExists {
        /// Name of the existing device.
        name: String,
    },

    /// The device does not exist.
    #[error("storage not found: {name}")]
    NotFound {
        /// Name of the missing device.
        name: String,
    },

    /// The stored bytes are not a valid device.
    #[error("invalid storage format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Encryption failed.
    #[error("encryption error: {message}")]
    Encryption {
        /// Description of the failure.
        message: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },
}

impl StorageError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an encryption error.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Returns true if this error reports a failed authentication check.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Returns true if this error reports an index outside the device.
    #[must_use]
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }
}
