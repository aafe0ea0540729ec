//! k-ary bucket heap addressing.
//!
//! Buckets are numbered level by level from the root:
//!
//! ```text
//! level 0:            0
//! level 1:      1           2
//! level 2:   3     4     5     6
//! ```
//!
//! For base `k`, the children of bucket `b` are `b*k + 1 ..= b*k + k` and
//! its parent is `(b - 1) / k`. Bucket `b` holds blocks
//! `b * blocks_per_bucket .. (b + 1) * blocks_per_bucket`.

use crate::error::{HeapError, HeapResult};
use rand::Rng;
use std::ops::Range;

/// Shape of a complete k-ary heap of buckets.
///
/// All counts are fixed at construction and checked to fit in `u64`, so the
/// addressing methods never overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualHeap {
    base: u32,
    height: u32,
    blocks_per_bucket: u32,
    bucket_count: u64,
    leaf_count: u64,
}

impl VirtualHeap {
    /// Creates a heap with the given base, height and bucket size.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `base < 2`, `blocks_per_bucket == 0`,
    /// or the block count does not fit in `u64`.
    pub fn new(base: u32, height: u32, blocks_per_bucket: u32) -> HeapResult<Self> {
        if base < 2 {
            return Err(HeapError::config(format!(
                "heap base must be at least 2, got {base}"
            )));
        }
        if blocks_per_bucket == 0 {
            return Err(HeapError::config("blocks per bucket must be at least 1"));
        }

        let too_large = || {
            HeapError::config(format!(
                "heap of base {base} and height {height} is too large"
            ))
        };
        let k = u64::from(base);
        let mut width = 1u64;
        let mut bucket_count = 1u64;
        for _ in 0..height {
            width = width.checked_mul(k).ok_or_else(too_large)?;
            bucket_count = bucket_count.checked_add(width).ok_or_else(too_large)?;
        }
        bucket_count
            .checked_mul(u64::from(blocks_per_bucket))
            .ok_or_else(too_large)?;

        Ok(Self {
            base,
            height,
            blocks_per_bucket,
            bucket_count,
            leaf_count: width,
        })
    }

    /// Returns the branching factor `k`.
    #[must_use]
    pub fn heap_base(&self) -> u32 {
        self.base
    }

    /// Returns the height. A single-bucket heap has height 0.
    #[must_use]
    pub fn heap_height(&self) -> u32 {
        self.height
    }

    /// Returns the number of blocks in each bucket.
    #[must_use]
    pub fn blocks_per_bucket(&self) -> u32 {
        self.blocks_per_bucket
    }

    /// Returns the total number of buckets.
    #[must_use]
    pub fn bucket_count(&self) -> u64 {
        self.bucket_count
    }

    /// Returns the number of buckets on levels `0..=height`.
    ///
    /// # Errors
    ///
    /// Returns an error if `height` exceeds the heap height.
    pub fn bucket_count_at_height(&self, height: u32) -> HeapResult<u64> {
        self.check_level(height)?;
        Ok(self.level_end(height))
    }

    /// Returns the total number of blocks.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.bucket_count * u64::from(self.blocks_per_bucket)
    }

    /// Returns the number of leaf buckets, `k^height`.
    #[must_use]
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// Returns the bucket of the `n`-th leaf, counting left to right.
    ///
    /// # Errors
    ///
    /// Returns an error if `n >= leaf_count()`.
    pub fn leaf_bucket(&self, n: u64) -> HeapResult<u64> {
        if n >= self.leaf_count {
            return Err(HeapError::BucketOutOfRange {
                bucket: n,
                bucket_count: self.leaf_count,
            });
        }
        Ok(self.first_leaf() + n)
    }

    /// Returns the first bucket on `level`.
    ///
    /// # Errors
    ///
    /// Returns an error if `level` exceeds the heap height.
    pub fn first_bucket_at_level(&self, level: u32) -> HeapResult<u64> {
        self.check_level(level)?;
        Ok(match level {
            0 => 0,
            _ => self.level_end(level - 1),
        })
    }

    /// Returns the last bucket on `level`.
    ///
    /// # Errors
    ///
    /// Returns an error if `level` exceeds the heap height.
    pub fn last_bucket_at_level(&self, level: u32) -> HeapResult<u64> {
        self.check_level(level)?;
        Ok(self.level_end(level) - 1)
    }

    /// Returns the level of `bucket`; the root is on level 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range.
    pub fn bucket_level(&self, bucket: u64) -> HeapResult<u32> {
        self.check_bucket(bucket)?;
        Ok(self.level_of(bucket))
    }

    /// Returns true if `bucket` is on the last level.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range.
    pub fn is_leaf(&self, bucket: u64) -> HeapResult<bool> {
        self.check_bucket(bucket)?;
        Ok(bucket >= self.first_leaf())
    }

    /// Returns the parent of `bucket`.
    ///
    /// # Errors
    ///
    /// Returns an error for the root or an out-of-range bucket.
    pub fn parent(&self, bucket: u64) -> HeapResult<u64> {
        self.check_bucket(bucket)?;
        match bucket {
            0 => Err(HeapError::RootHasNoParent),
            _ => Ok((bucket - 1) / u64::from(self.base)),
        }
    }

    /// Returns the `k` children of `bucket`, left to right.
    ///
    /// # Errors
    ///
    /// Returns an error for a leaf or an out-of-range bucket.
    pub fn children(&self, bucket: u64) -> HeapResult<Range<u64>> {
        if self.is_leaf(bucket)? {
            return Err(HeapError::LeafHasNoChildren { bucket });
        }
        let k = u64::from(self.base);
        let first = bucket * k + 1;
        Ok(first..first + k)
    }

    /// Iterates from `bucket` up to the root, inclusive.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range.
    pub fn ancestors(&self, bucket: u64) -> HeapResult<Ancestors> {
        self.check_bucket(bucket)?;
        Ok(Ancestors {
            next: Some(bucket),
            base: u64::from(self.base),
        })
    }

    /// Returns the buckets from `bucket` to the root, leaf first.
    ///
    /// The path has `bucket_level(bucket) + 1` entries, `heap_height + 1` for
    /// a leaf.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range.
    pub fn path_to_root(&self, bucket: u64) -> HeapResult<Vec<u64>> {
        Ok(self.ancestors(bucket)?.collect())
    }

    /// Returns the buckets from the root to `bucket`, root first.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range.
    pub fn path_from_root(&self, bucket: u64) -> HeapResult<Vec<u64>> {
        let mut path = self.path_to_root(bucket)?;
        path.reverse();
        Ok(path)
    }

    /// Returns the index of the first block of `bucket`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range.
    pub fn first_block(&self, bucket: u64) -> HeapResult<u64> {
        self.check_bucket(bucket)?;
        Ok(bucket * u64::from(self.blocks_per_bucket))
    }

    /// Returns the block indices of `bucket`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket is out of range.
    pub fn block_range(&self, bucket: u64) -> HeapResult<Range<u64>> {
        let first = self.first_block(bucket)?;
        Ok(first..first + u64::from(self.blocks_per_bucket))
    }

    /// Returns the deepest level shared by the paths of `a` and `b`.
    ///
    /// # Errors
    ///
    /// Returns an error if either bucket is out of range.
    pub fn last_common_level(&self, a: u64, b: u64) -> HeapResult<u32> {
        let (mut a, mut b) = (a, b);
        let mut level_a = self.bucket_level(a)?;
        let mut level_b = self.bucket_level(b)?;
        let k = u64::from(self.base);

        while level_a > level_b {
            a = (a - 1) / k;
            level_a -= 1;
        }
        while level_b > level_a {
            b = (b - 1) / k;
            level_b -= 1;
        }
        while a != b {
            a = (a - 1) / k;
            b = (b - 1) / k;
            level_a -= 1;
        }
        Ok(level_a)
    }

    /// Picks a leaf bucket uniformly at random.
    pub fn random_leaf_bucket<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        self.first_leaf() + rng.gen_range(0..self.leaf_count)
    }

    /// Picks a bucket uniformly at random.
    pub fn random_bucket<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(0..self.bucket_count)
    }

    pub(crate) fn check_bucket(&self, bucket: u64) -> HeapResult<()> {
        if bucket >= self.bucket_count {
            return Err(HeapError::BucketOutOfRange {
                bucket,
                bucket_count: self.bucket_count,
            });
        }
        Ok(())
    }

    fn check_level(&self, level: u32) -> HeapResult<()> {
        if level > self.height {
            return Err(HeapError::LevelOutOfRange {
                level,
                height: self.height,
            });
        }
        Ok(())
    }

    fn first_leaf(&self) -> u64 {
        self.bucket_count - self.leaf_count
    }

    // Buckets on levels 0..=level; level must not exceed the height.
    fn level_end(&self, level: u32) -> u64 {
        let k = u64::from(self.base);
        let mut width = 1u64;
        let mut end = 1u64;
        for _ in 0..level {
            width *= k;
            end += width;
        }
        end
    }

    fn level_of(&self, bucket: u64) -> u32 {
        let k = u64::from(self.base);
        let mut level = 0;
        let mut width = 1u64;
        let mut end = 1u64;
        while bucket >= end {
            width *= k;
            end += width;
            level += 1;
        }
        level
    }
}

/// Iterator over a bucket and its ancestors, ending at the root.
#[derive(Debug, Clone)]
pub struct Ancestors {
    next: Option<u64>,
    base: u64,
}

impl Iterator for Ancestors {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.next?;
        self.next = match current {
            0 => None,
            _ => Some((current - 1) / self.base),
        };
        Some(current)
    }
}
