//! Sources for tests and demos.

mod bytes_src;

pub use bytes_src::{BytesSrc, DEFAULT_BLOCKSIZE};
