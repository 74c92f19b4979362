//! Element system: pads, elements, state machine and streaming helpers.
//!
//! - [`Pad`]: directional connection point carrying buffers, events and
//!   queries between elements.
//! - [`Element`]: a named set of pads with a NULL/READY/PAUSED/PLAYING
//!   state machine; behaviour is supplied through [`ElementImpl`].
//! - [`Task`]: a named streaming thread, the only place an element owns a
//!   thread.
//! - [`DataQueue`]: bounded, flush-interruptible queue used at thread
//!   boundaries.
//! - [`CollectPads`]: synchronisation point for N-to-1 aggregators.
//!
//! # Threading
//!
//! A push runs the downstream chain function on the caller's thread and a
//! pull runs the upstream getrange function on the caller's thread. Thread
//! boundaries only exist where an element runs a [`Task`].
//!
//! # Example
//!
//! ```rust
//! use padflow::buffer::Buffer;
//! use padflow::element::{Element, DefaultElementImpl, Pad, PadDirection, State};
//! use padflow::event::{Event, StreamStartEvent};
//!
//! let sink_pad = Pad::builder("sink", PadDirection::Sink)
//!     .chain_function(|_pad, _buffer| Ok(padflow::flow::FlowSuccess::Ok))
//!     .build();
//! let sink = Element::new("sink", DefaultElementImpl);
//! sink.add_pad(&sink_pad).unwrap();
//!
//! let src_pad = Pad::builder("src", PadDirection::Src).build();
//! src_pad.link(&sink_pad).unwrap();
//! let src = Element::new("src", DefaultElementImpl);
//! src.add_pad(&src_pad).unwrap();
//!
//! sink.set_state(State::Paused).unwrap();
//! src.set_state(State::Paused).unwrap();
//!
//! src_pad.push_event(Event::StreamStart(StreamStartEvent::new("demo")));
//! src_pad.push_event(Event::Caps("audio/raw".parse().unwrap()));
//! assert!(src_pad.push(Buffer::from_vec(vec![1, 2, 3])).is_ok());
//! ```

mod collect;
mod data_queue;
mod instance;
mod pad;
mod state;
mod task;
mod traits;

pub use collect::{
    BufferFunction, ClipFunction, CollectEventFunction, CollectPads, CollectedFunction,
    CompareFunction,
};
pub use data_queue::{DataQueue, DataQueueItem, LeakyMode, QueueConfig, QueueLevel};
pub use instance::{Element, WeakElement};
pub use pad::{
    ActivateFunction, ActivateModeFunction, ChainFunction, EventFunction, GetRangeFunction, Pad,
    PadBuilder, PadDirection, PadLinkError, PadLinkState, PadMode, PadPresence, PadTemplate,
    QueryFunction,
};
pub use state::{State, StateChange, StateChangeError, StateChangeSuccess};
pub use task::{Task, TaskState};
pub use traits::{DefaultElementImpl, ElementImpl};
