//! Path-level access to a bucket heap.

use crate::error::HeapResult;
use crate::heap::VirtualHeap;

/// The blocks of one bucket, in block order.
pub type Bucket = Vec<Vec<u8>>;

/// Reading and writing whole root-to-bucket paths.
///
/// Paths are always ordered root first. A path to bucket `b` holds
/// `bucket_level(b) + 1` buckets; the `_from_level` variants skip the levels
/// above `level_start`.
pub trait PathStorage {
    /// Returns the heap shape.
    fn virtual_heap(&self) -> &VirtualHeap;

    /// Reads the buckets on the path to `bucket` from `level_start` down.
    fn read_path_from_level(&self, bucket: u64, level_start: u32) -> HeapResult<Vec<Bucket>>;

    /// Writes the buckets on the path to `bucket` from `level_start` down.
    fn write_path_from_level(
        &mut self,
        bucket: u64,
        level_start: u32,
        buckets: &[Bucket],
    ) -> HeapResult<()>;

    /// Reads every bucket on the path from the root to `bucket`.
    fn read_path(&self, bucket: u64) -> HeapResult<Vec<Bucket>> {
        self.read_path_from_level(bucket, 0)
    }

    /// Writes every bucket on the path from the root to `bucket`.
    fn write_path(&mut self, bucket: u64, buckets: &[Bucket]) -> HeapResult<()> {
        self.write_path_from_level(bucket, 0, buckets)
    }
}
