//! Multiplexing elements.

mod timestamp_mux;

pub use timestamp_mux::TimestampMux;
