//! # oheap Storage
//!
//! Fixed-size block devices and per-block authenticated encryption.
//!
//! This crate is the lowest layer of oheap. A device is a header followed by
//! `block_count` blocks of exactly `block_size` bytes. Devices do not
//! interpret the blocks they store.
//!
//! ## Design Principles
//!
//! - [`BlockStorage`] is the I/O capability and is object-safe
//! - [`BlockDevice`] adds the lifecycle: setup, open, clone, close
//! - All backends share one byte layout (see [`DevicePrefix`])
//! - Encryption wraps any device without knowing which one
//!
//! ## Available Backends
//!
//! - [`MemoryBlockStorage`] - For testing and ephemeral storage
//! - [`FileBlockStorage`] - A single pre-sized file
//! - [`ObjectStoreBlockStorage`] - One object per block in an [`ObjectStore`]
//! - [`EncryptedBlockStorage`] - Wrapper that adds AES-256-GCM encryption
//!
//! ## Example
//!
//! ```rust
//! use oheap_storage::{BlockDevice, BlockStorage, BlockStorageConfig, MemoryBlockStorage, MemoryRegion};
//!
//! let region = MemoryRegion::new();
//! let mut device = MemoryBlockStorage::setup(&region, &BlockStorageConfig::new(4, 2), None).unwrap();
//! device.write_block(1, b"abcd").unwrap();
//! assert_eq!(device.read_block(1).unwrap(), b"abcd");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod encrypted;
mod error;
mod file;
mod key;
mod layout;
mod memory;
mod object;
mod stats;

pub use backend::{BlockDevice, BlockInitializer, BlockStorage};
pub use config::{BlockStorageConfig, OpenOptions, ProgressSink};
pub use encrypted::{
    ciphertext_block_size, EncryptedBlockStorage, KeyDerivation, BLOCK_OVERHEAD,
    ENCRYPTION_HEADER_SIZE, NONCE_SIZE, TAG_SIZE,
};
pub use error::{StorageError, StorageResult};
pub use file::FileBlockStorage;
pub use key::{EncryptionConfig, EncryptionKey, KeyMaterial, KEY_SIZE, SALT_SIZE};
pub use layout::{storage_size, DevicePrefix, DEVICE_MAGIC, DEVICE_PREFIX_SIZE};
pub use memory::{MemoryBlockStorage, MemoryRegion};
pub use object::{
    DirectoryObjectStore, MemoryObjectStore, ObjectLocation, ObjectStore, ObjectStoreBlockStorage,
};
pub use stats::IoStats;
