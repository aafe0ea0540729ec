//! Per-handle I/O counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes moved between a handle and its medium.
///
/// Counters are atomic so reads through `&self` can update them. Each handle,
/// including clones, starts from zero.
#[derive(Debug, Default)]
pub struct IoStats {
    /// Total bytes written to the medium.
    bytes_sent: AtomicU64,
    /// Total bytes read from the medium.
    bytes_received: AtomicU64,
}

impl IoStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Returns the total bytes written.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Returns the total bytes read.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}
