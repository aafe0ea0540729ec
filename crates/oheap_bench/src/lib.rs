//! Shared helpers for the oheap benchmarks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
