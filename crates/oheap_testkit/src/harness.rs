//! Model-checked path storage.
//!
//! Wraps any [`PathStorage`] and tracks the expected content of every bucket,
//! so a sequence of path writes can be verified against what reads return.

use oheap_core::{Bucket, PathStorage};
use std::collections::HashMap;

/// A test harness that mirrors path writes in memory.
pub struct PathHarness<P: PathStorage> {
    /// The storage under test.
    pub storage: P,
    block_size: usize,
    buckets: HashMap<u64, Bucket>,
}

impl<P: PathStorage> PathHarness<P> {
    /// Wraps a freshly set up storage whose blocks are all zero.
    pub fn new(storage: P, block_size: usize) -> Self {
        Self {
            storage,
            block_size,
            buckets: HashMap::new(),
        }
    }

    /// Writes a path and records it.
    pub fn write_path(&mut self, bucket: u64, buckets: Vec<Bucket>) {
        self.storage
            .write_path(bucket, &buckets)
            .expect("Failed to write path");
        let path = self
            .storage
            .virtual_heap()
            .path_from_root(bucket)
            .expect("Bucket out of range");
        for (b, content) in path.into_iter().zip(buckets) {
            self.buckets.insert(b, content);
        }
    }

    /// Returns the expected content of a bucket.
    pub fn expected_bucket(&self, bucket: u64) -> Bucket {
        self.buckets.get(&bucket).cloned().unwrap_or_else(|| {
            let blocks = self.storage.virtual_heap().blocks_per_bucket() as usize;
            vec![vec![0u8; self.block_size]; blocks]
        })
    }

    /// Reads a path and asserts it matches the recorded writes.
    pub fn read_and_verify(&self, bucket: u64) -> Vec<Bucket> {
        let actual = self.storage.read_path(bucket).expect("Failed to read path");
        let path = self
            .storage
            .virtual_heap()
            .path_from_root(bucket)
            .expect("Bucket out of range");
        assert_eq!(actual.len(), path.len(), "Path length mismatch for {bucket}");
        for (b, content) in path.into_iter().zip(&actual) {
            assert_eq!(
                content,
                &self.expected_bucket(b),
                "Bucket {b} mismatch on path to {bucket}"
            );
        }
        actual
    }

    /// Verifies every leaf path, which covers every bucket.
    pub fn verify_all(&self) {
        let heap = *self.storage.virtual_heap();
        for n in 0..heap.leaf_count() {
            let leaf = heap.leaf_bucket(n).expect("Leaf out of range");
            self.read_and_verify(leaf);
        }
    }

    /// Returns the number of buckets written so far.
    pub fn written_bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
