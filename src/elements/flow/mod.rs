//! Flow control elements.

mod queue;

pub use queue::{Queue, QueueItem};
