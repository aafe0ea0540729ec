//! Benchmark utilities.

use oheap_core::{Bucket, VirtualHeap};
use rand::Rng;

/// Generate random block data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a random root-first path to `bucket`.
pub fn random_path(heap: &VirtualHeap, bucket: u64, block_size: usize) -> Vec<Bucket> {
    let len = heap.path_to_root(bucket).map(|path| path.len()).unwrap_or(0);
    (0..len)
        .map(|_| {
            (0..heap.blocks_per_bucket())
                .map(|_| random_data(block_size))
                .collect()
        })
        .collect()
}

/// Pick `count` random leaf buckets.
pub fn random_leaves(heap: &VirtualHeap, count: usize) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| heap.random_leaf_bucket(&mut rng)).collect()
}
