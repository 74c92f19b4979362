//! Built-in elements.
//!
//! ## Sources
//! - [`BytesSrc`]: serves a byte array, pushed by a task or pulled by range
//!
//! ## Sinks
//! - [`AppSink`]: records buffers and events for application code
//!
//! ## Transforms
//! - [`Identity`]: passes buffers through, with counters and test hooks
//! - [`Queue`]: decouples upstream and downstream threads
//!
//! ## Aggregation
//! - [`TimestampMux`]: interleaves request inputs by timestamp

mod app;
mod flow;
mod identity;
mod mux;
mod testing;

// Sources
pub use testing::{BytesSrc, DEFAULT_BLOCKSIZE};

// Sinks
pub use app::AppSink;

// Transforms
pub use flow::{Queue, QueueItem};
pub use identity::{BufferCallback, DropFilter, Identity, IdentityStats};

// Aggregation
pub use mux::TimestampMux;
