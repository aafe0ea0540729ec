//! # oheap Core
//!
//! Bucket heaps for Path ORAM on top of [`oheap_storage`] block devices.
//!
//! A heap of base `k` and height `h` has `(k^(h+1) - 1) / (k - 1)` buckets,
//! each holding `blocks_per_bucket` blocks. An ORAM client reads and writes
//! whole root-to-leaf paths; this crate maps those paths onto block indices
//! and, with [`EncryptedHeapStorage`], keeps every block encrypted at rest.
//!
//! ## Components
//!
//! - [`VirtualHeap`] - pure addressing math, no I/O
//! - [`HeapStorage`] - a heap over any [`oheap_storage::BlockStorage`]
//! - [`EncryptedHeapStorage`] - a heap over an encrypted device
//! - [`PathStorage`] - the path read/write capability both storages share
//!
//! ## Example
//!
//! ```rust
//! use oheap_core::{HeapConfig, HeapStorage};
//! use oheap_storage::{MemoryBlockStorage, MemoryRegion};
//!
//! let region = MemoryRegion::new();
//! let heap = HeapStorage::<MemoryBlockStorage>::setup(&region, &HeapConfig::new(32, 2)).unwrap();
//! assert_eq!(heap.virtual_heap().path_from_root(3).unwrap(), vec![0, 1, 3]);
//! assert_eq!(heap.read_path(3).unwrap().len(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod encrypted_heap_storage;
mod error;
mod header;
mod heap;
mod heap_storage;
mod path;

pub use config::HeapConfig;
pub use encrypted_heap_storage::{EncryptedHeapStorage, HeapSource};
pub use error::{HeapError, HeapResult};
pub use header::HEAP_HEADER_SIZE;
pub use heap::{Ancestors, VirtualHeap};
pub use heap_storage::HeapStorage;
pub use path::{Bucket, PathStorage};
