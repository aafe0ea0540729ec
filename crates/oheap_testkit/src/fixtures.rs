//! Test fixtures and heap helpers.
//!
//! Provides temporary heap devices that clean up after themselves, and
//! recognisable block payloads.

use oheap_core::{Bucket, EncryptedHeapStorage, HeapConfig, VirtualHeap};
use oheap_storage::{
    EncryptionConfig, EncryptionKey, FileBlockStorage, MemoryBlockStorage, MemoryRegion,
    OpenOptions,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An encrypted file-backed heap in a temporary directory.
pub struct TempHeap {
    /// The heap instance.
    pub heap: EncryptedHeapStorage<FileBlockStorage>,
    key: EncryptionKey,
    path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TempHeap {
    /// Creates a new encrypted heap with a random key.
    pub fn new(config: &HeapConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("heap.bin");
        let heap =
            EncryptedHeapStorage::<FileBlockStorage>::setup(&path, config, &EncryptionConfig::new())
                .expect("Failed to set up encrypted heap");
        let key = heap.key().clone();

        Self {
            heap,
            key,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the path of the device file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the device key.
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    /// Closes the heap and opens it again with the same key.
    pub fn reopen(self) -> Self {
        let Self {
            heap,
            key,
            path,
            _temp_dir,
        } = self;
        heap.close().expect("Failed to close heap");
        let heap = EncryptedHeapStorage::<FileBlockStorage>::open(
            &path,
            key.clone().into(),
            &OpenOptions::new(),
        )
        .expect("Failed to reopen heap");

        Self {
            heap,
            key,
            path,
            _temp_dir,
        }
    }
}

impl std::ops::Deref for TempHeap {
    type Target = EncryptedHeapStorage<FileBlockStorage>;

    fn deref(&self) -> &Self::Target {
        &self.heap
    }
}

impl std::ops::DerefMut for TempHeap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.heap
    }
}

/// Creates an encrypted heap in a fresh memory region.
pub fn memory_heap(
    config: &HeapConfig,
) -> (MemoryRegion, EncryptedHeapStorage<MemoryBlockStorage>) {
    let region = MemoryRegion::new();
    let heap =
        EncryptedHeapStorage::<MemoryBlockStorage>::setup(&region, config, &EncryptionConfig::new())
            .expect("Failed to set up memory heap");
    (region, heap)
}

/// Runs a test with a temporary encrypted file heap.
///
/// # Example
///
/// ```rust
/// use oheap_core::{HeapConfig, PathStorage};
/// use oheap_testkit::with_temp_heap;
///
/// with_temp_heap(&HeapConfig::new(16, 2), |heap| {
///     assert_eq!(heap.read_path(3).unwrap().len(), 3);
/// });
/// ```
pub fn with_temp_heap<F, R>(config: &HeapConfig, f: F) -> R
where
    F: FnOnce(&mut EncryptedHeapStorage<FileBlockStorage>) -> R,
{
    let mut temp = TempHeap::new(config);
    f(&mut temp.heap)
}

/// Returns a block whose bytes identify its bucket and slot.
///
/// The first 8 bytes hold the bucket (LE), byte 8 the slot; the rest is a
/// fill derived from both.
pub fn pattern_block(bucket: u64, slot: u32, block_size: usize) -> Vec<u8> {
    let fill = (bucket as u8).wrapping_mul(31).wrapping_add(slot as u8);
    let mut block = vec![fill; block_size];
    let id = bucket.to_le_bytes();
    let n = block_size.min(id.len());
    block[..n].copy_from_slice(&id[..n]);
    if block_size > id.len() {
        block[id.len()] = slot as u8;
    }
    block
}

/// Returns a full root-first path of [`pattern_block`] buckets.
pub fn pattern_path(heap: &VirtualHeap, bucket: u64, block_size: usize) -> Vec<Bucket> {
    heap.path_from_root(bucket)
        .expect("Bucket out of range")
        .into_iter()
        .map(|b| {
            (0..heap.blocks_per_bucket())
                .map(|slot| pattern_block(b, slot, block_size))
                .collect()
        })
        .collect()
}
