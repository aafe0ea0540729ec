//! Error types for the heap layer.

use oheap_storage::StorageError;
use thiserror::Error;

/// Result type for heap operations.
pub type HeapResult<T> = Result<T, HeapError>;

/// Errors that can occur in heap addressing and heap storage.
#[derive(Debug, Error)]
pub enum HeapError {
    /// Block storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid heap parameters. Raised before any I/O happens.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// A bucket index outside `[0, bucket_count)`.
    #[error("bucket {bucket} out of range (bucket count {bucket_count})")]
    BucketOutOfRange {
        /// The requested bucket.
        bucket: u64,
        /// Number of buckets in the heap.
        bucket_count: u64,
    },

    /// A level deeper than the heap height.
    #[error("level {level} out of range (heap height {height})")]
    LevelOutOfRange {
        /// The requested level.
        level: u32,
        /// Height of the heap.
        height: u32,
    },

    /// The root bucket was asked for its parent.
    #[error("the root bucket has no parent")]
    RootHasNoParent,

    /// A leaf bucket was asked for its children.
    #[error("leaf bucket {bucket} has no children")]
    LeafHasNoChildren {
        /// The leaf bucket.
        bucket: u64,
    },

    /// A path write supplied the wrong number of buckets.
    #[error("path length mismatch: expected {expected} buckets, got {actual}")]
    PathLengthMismatch {
        /// Buckets on the path.
        expected: usize,
        /// Buckets supplied.
        actual: usize,
    },

    /// A bucket write supplied the wrong number of blocks.
    #[error("bucket size mismatch: expected {expected} blocks, got {actual}")]
    BucketSizeMismatch {
        /// Blocks per bucket.
        expected: usize,
        /// Blocks supplied.
        actual: usize,
    },

    /// The heap header is missing or malformed.
    #[error("invalid heap format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

impl HeapError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns true if this error reports failed authentication of stored data.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_integrity())
    }

    /// Returns true if a bucket, level or block index was out of range.
    #[must_use]
    pub fn is_out_of_range(&self) -> bool {
        match self {
            Self::BucketOutOfRange { .. } | Self::LevelOutOfRange { .. } => true,
            Self::Storage(err) => err.is_out_of_range(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_passes_through() {
        let err: HeapError = StorageError::integrity("bad tag").into();
        assert!(err.is_integrity());
        assert!(!HeapError::config("x").is_integrity());
    }

    #[test]
    fn out_of_range_variants() {
        assert!(HeapError::BucketOutOfRange {
            bucket: 9,
            bucket_count: 7
        }
        .is_out_of_range());
        let err: HeapError = StorageError::OutOfRange {
            index: 3,
            block_count: 3,
        }
        .into();
        assert!(err.is_out_of_range());
        assert!(!HeapError::RootHasNoParent.is_out_of_range());
    }

    #[test]
    fn messages() {
        let err = HeapError::PathLengthMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "path length mismatch: expected 4 buckets, got 3"
        );
    }
}
