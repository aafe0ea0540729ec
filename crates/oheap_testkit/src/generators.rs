//! Property-based test generators using proptest.
//!
//! Provides strategies for heap shapes, buckets and paths that always
//! satisfy the heap's invariants.

use oheap_core::{Bucket, HeapConfig, VirtualHeap};
use proptest::prelude::*;

/// Strategy for small heap shapes: base 2..=4, height 0..=4, 1..=3 blocks
/// per bucket.
pub fn heap_shape_strategy() -> impl Strategy<Value = VirtualHeap> {
    (2u32..=4, 0u32..=4, 1u32..=3).prop_map(|(base, height, blocks_per_bucket)| {
        VirtualHeap::new(base, height, blocks_per_bucket).expect("Invalid heap shape")
    })
}

/// Strategy for a heap shape and one of its buckets.
pub fn heap_and_bucket_strategy() -> impl Strategy<Value = (VirtualHeap, u64)> {
    heap_shape_strategy().prop_flat_map(|heap| (Just(heap), 0..heap.bucket_count()))
}

/// Strategy for a heap shape and one of its leaf buckets.
pub fn heap_and_leaf_strategy() -> impl Strategy<Value = (VirtualHeap, u64)> {
    heap_shape_strategy().prop_flat_map(|heap| {
        let first_leaf = heap.bucket_count() - heap.leaf_count();
        (Just(heap), first_leaf..heap.bucket_count())
    })
}

/// Strategy for heap configurations matching [`heap_shape_strategy`], with
/// block sizes from 1 to 128 bytes.
pub fn heap_config_strategy() -> impl Strategy<Value = HeapConfig> {
    (heap_shape_strategy(), 1usize..=128).prop_map(|(heap, block_size)| {
        HeapConfig::new(block_size, heap.heap_height())
            .heap_base(heap.heap_base())
            .blocks_per_bucket(heap.blocks_per_bucket())
    })
}

/// Strategy for block payloads of exactly `block_size` bytes.
pub fn block_strategy(block_size: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), block_size)
}

/// Strategy for one bucket of `blocks_per_bucket` blocks.
pub fn bucket_strategy(blocks_per_bucket: u32, block_size: usize) -> impl Strategy<Value = Bucket> {
    prop::collection::vec(block_strategy(block_size), blocks_per_bucket as usize)
}

/// Strategy for a root-first path of `len` buckets.
pub fn path_strategy(
    len: usize,
    blocks_per_bucket: u32,
    block_size: usize,
) -> impl Strategy<Value = Vec<Bucket>> {
    prop::collection::vec(bucket_strategy(blocks_per_bucket, block_size), len)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    ///
    /// Every case that touches an encrypted device runs AES-GCM over the
    /// whole heap at setup, so I/O-heavy properties should use this.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
