//! # Padflow
//!
//! A pad-based streaming core: reference-counted buffers, caps negotiation,
//! push/pull data flow between linked pads and a four-state element
//! lifecycle.
//!
//! ## Features
//!
//! - **Copy-on-write buffers**: shared handles, writable only when exclusive
//! - **Caps negotiation**: intersect, fixate and accept between pad templates
//! - **Push and pull scheduling**: chain functions, getrange and streaming tasks
//! - **Flow control**: `FlowResult` codes propagate upstream unchanged
//! - **State machine**: NULL, READY, PAUSED, PLAYING with async completion
//! - **Aggregation**: `CollectPads` for N-to-1 elements
//!
//! ## Quick Start
//!
//! ```rust
//! use padflow::prelude::*;
//! use padflow::elements::{AppSink, Identity};
//!
//! let identity = Identity::new("id");
//! let sink = AppSink::new("sink");
//! identity.element().pad("src").unwrap()
//!     .link(&sink.pad().unwrap())
//!     .unwrap();
//!
//! let src = Pad::builder("out", PadDirection::Src).build();
//! src.link(&identity.element().pad("sink").unwrap()).unwrap();
//!
//! sink.element().set_state(State::Playing).unwrap();
//! identity.element().set_state(State::Playing).unwrap();
//! src.set_active(true).unwrap();
//!
//! src.push_event(Event::StreamStart(StreamStartEvent::new("demo")));
//! src.push_event(Event::Caps("application/x-demo".parse().unwrap()));
//! assert_eq!(src.push(Buffer::from_vec(vec![1, 2, 3])), Ok(FlowSuccess::Ok));
//! assert_eq!(sink.buffers().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod caps;
pub mod clock;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod flow;
pub mod metadata;
pub mod negotiation;
pub mod observability;
pub mod pipeline;

mod sync;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::Buffer;
    pub use crate::caps::Caps;
    pub use crate::clock::ClockTime;
    pub use crate::element::{
        Element, ElementImpl, Pad, PadDirection, PadMode, PadTemplate, State, StateChange,
        StateChangeSuccess,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, Query, SegmentEvent, StreamStartEvent};
    pub use crate::flow::{FlowError, FlowResult, FlowSuccess};
    pub use crate::metadata::Metadata;
    pub use crate::pipeline::{Bus, Message, Pipeline};
}

pub use error::{Error, Result};
