//! Pipelines and the message bus.
//!
//! - [`Pipeline`]: top-level container driving its children's state
//!   changes and aggregating their results.
//! - [`Bus`]: channel carrying [`Message`]s from elements to the
//!   application.
//!
//! # Example
//!
//! ```rust
//! use padflow::elements::{AppSink, BytesSrc};
//! use padflow::element::State;
//! use padflow::pipeline::{MessageKind, Pipeline};
//! use std::time::Duration;
//!
//! let pipeline = Pipeline::new("copy");
//! let src = BytesSrc::new("src", vec![7u8; 4096]).with_blocksize(1024);
//! let sink = AppSink::new("sink");
//! pipeline.add_many(&[src.element(), sink.element()]).unwrap();
//! pipeline.link(src.element(), sink.element()).unwrap();
//!
//! pipeline.set_state(State::Playing).unwrap();
//! let msg = pipeline
//!     .bus()
//!     .timed_pop_filtered(Some(Duration::from_secs(5)), |m| {
//!         matches!(m.kind(), MessageKind::Eos | MessageKind::Error { .. })
//!     })
//!     .unwrap();
//! assert!(msg.is_eos());
//! assert_eq!(sink.buffers().len(), 4);
//! pipeline.set_state(State::Null).unwrap();
//! ```

mod bus;
mod graph;

pub use bus::{Bus, BusConfig, BusSyncReply, Message, MessageKind};
pub use graph::Pipeline;
