//! # oheap Testkit
//!
//! Test utilities for oheap.
//!
//! This crate provides:
//! - Temporary heap fixtures and recognisable block payloads
//! - Property-based test generators using proptest
//! - A model-checked harness for path reads and writes
//! - Log output for tests
//!
//! ## Usage
//!
//! ```rust
//! use oheap_core::{HeapConfig, PathStorage};
//! use oheap_testkit::prelude::*;
//!
//! init_tracing();
//! let config = HeapConfig::new(16, 2);
//! let (_region, heap) = memory_heap(&config);
//! let shape = *heap.virtual_heap();
//! let mut harness = PathHarness::new(heap, 16);
//! harness.write_path(5, pattern_path(&shape, 5, 16));
//! harness.verify_all();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
pub use logging::*;
