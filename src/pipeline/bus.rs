//! Pipeline bus: the out-of-band channel from streaming threads to the
//! application.
//!
//! Flow returns only say that something went wrong; the details of fatal
//! errors, warnings, EOS and state changes are posted here as
//! [`Message`]s. Posting never blocks a streaming thread.
//!
//! ```rust
//! use padflow::pipeline::{Bus, BusConfig, Message, MessageKind};
//! use std::time::Duration;
//!
//! let bus = Bus::new(BusConfig::default());
//! bus.post(Message::eos("sink"));
//! let msg = bus.timed_pop(Some(Duration::from_millis(10))).unwrap();
//! assert_eq!(msg.kind(), &MessageKind::Eos);
//! ```

use crate::caps::Structure;
use crate::element::State;
use crate::sync::lock;
use kanal::{Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// What a message is about.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// A fatal error; the pipeline should be shut down.
    Error {
        /// Human-readable description.
        error: String,
        /// Extra diagnostics.
        debug: Option<String>,
    },
    /// A non-fatal problem.
    Warning {
        /// Human-readable description.
        warning: String,
        /// Extra diagnostics.
        debug: Option<String>,
    },
    /// All sinks reached end of stream.
    Eos,
    /// An element changed state.
    StateChanged {
        /// Previous state.
        old: State,
        /// New current state.
        new: State,
        /// Final target if more transitions follow.
        pending: Option<State>,
    },
    /// An asynchronous state change completed.
    AsyncDone,
    /// A new stream started.
    StreamStart,
    /// Element-specific payload.
    Element(Structure),
}

/// A message posted by an element.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    source: String,
    kind: MessageKind,
}

impl Message {
    /// Create a message from `source`.
    pub fn new(source: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            source: source.into(),
            kind,
        }
    }

    /// Error message.
    pub fn error(source: impl Into<String>, error: impl Into<String>, debug: Option<String>) -> Self {
        Self::new(
            source,
            MessageKind::Error {
                error: error.into(),
                debug,
            },
        )
    }

    /// Warning message.
    pub fn warning(source: impl Into<String>, warning: impl Into<String>) -> Self {
        Self::new(
            source,
            MessageKind::Warning {
                warning: warning.into(),
                debug: None,
            },
        )
    }

    /// End-of-stream message.
    pub fn eos(source: impl Into<String>) -> Self {
        Self::new(source, MessageKind::Eos)
    }

    /// Name of the posting element.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Message payload.
    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Check if this is an error message.
    pub fn is_error(&self) -> bool {
        matches!(self.kind, MessageKind::Error { .. })
    }

    /// Check if this is an EOS message.
    pub fn is_eos(&self) -> bool {
        matches!(self.kind, MessageKind::Eos)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MessageKind::Error { error, .. } => write!(f, "Error in {}: {}", self.source, error),
            MessageKind::Warning { warning, .. } => {
                write!(f, "Warning in {}: {}", self.source, warning)
            }
            MessageKind::Eos => write!(f, "EOS from {}", self.source),
            MessageKind::StateChanged { old, new, .. } => {
                write!(f, "{}: state changed {} -> {}", self.source, old, new)
            }
            MessageKind::AsyncDone => write!(f, "{}: async done", self.source),
            MessageKind::StreamStart => write!(f, "{}: stream start", self.source),
            MessageKind::Element(s) => write!(f, "{}: {}", self.source, s),
        }
    }
}

/// Reply of a synchronous bus handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSyncReply {
    /// Queue the message for asynchronous retrieval.
    Pass,
    /// Discard the message.
    Drop,
}

/// Bus configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusConfig {
    /// Maximum queued messages; `None` is unbounded. When a bounded bus is
    /// full, new messages are dropped rather than blocking the poster.
    pub capacity: Option<usize>,
}

impl BusConfig {
    /// Set the capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

type SyncHandler = Arc<dyn Fn(&Message) -> BusSyncReply + Send + Sync>;

struct BusInner {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    sync_handler: Mutex<Option<SyncHandler>>,
    flushing: AtomicBool,
}

/// Multi-producer message queue. Cloning yields another handle to the
/// same bus.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// Create a bus.
    pub fn new(config: BusConfig) -> Self {
        let (sender, receiver) = match config.capacity {
            Some(capacity) => kanal::bounded(capacity),
            None => kanal::unbounded(),
        };
        Self {
            inner: Arc::new(BusInner {
                sender,
                receiver,
                sync_handler: Mutex::new(None),
                flushing: AtomicBool::new(false),
            }),
        }
    }

    /// Post a message. Runs the sync handler on the calling thread first.
    ///
    /// Returns false if the message was dropped (flushing bus, sync handler
    /// or full bounded bus).
    pub fn post(&self, message: Message) -> bool {
        if self.inner.flushing.load(Ordering::Acquire) {
            return false;
        }
        let handler = lock(&self.inner.sync_handler).clone();
        if let Some(handler) = handler {
            if handler(&message) == BusSyncReply::Drop {
                return false;
            }
        }
        trace!(%message, "bus post");
        match self.inner.sender.try_send(message) {
            Ok(true) => true,
            Ok(false) => {
                warn!("bus full, dropping message");
                false
            }
            Err(_) => false,
        }
    }

    /// Install the synchronous handler, replacing any previous one.
    pub fn set_sync_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) -> BusSyncReply + Send + Sync + 'static,
    {
        *lock(&self.inner.sync_handler) = Some(Arc::new(handler));
    }

    /// Remove the synchronous handler.
    pub fn unset_sync_handler(&self) {
        *lock(&self.inner.sync_handler) = None;
    }

    /// Take the next message without waiting.
    pub fn pop(&self) -> Option<Message> {
        self.inner.receiver.try_recv().ok().flatten()
    }

    /// Wait for the next message. `None` waits forever.
    pub fn timed_pop(&self, timeout: Option<Duration>) -> Option<Message> {
        match timeout {
            Some(timeout) => self.inner.receiver.recv_timeout(timeout).ok(),
            None => self.inner.receiver.recv().ok(),
        }
    }

    /// Wait for the next message matching `filter`, discarding others.
    pub fn timed_pop_filtered(
        &self,
        timeout: Option<Duration>,
        filter: impl Fn(&Message) -> bool,
    ) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining.is_some_and(|r| r.is_zero()) {
                return None;
            }
            let message = self.timed_pop(remaining)?;
            if filter(&message) {
                return Some(message);
            }
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.receiver.len()
    }

    /// Check if no message is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// While flushing, queued messages are discarded and posts are dropped.
    pub fn set_flushing(&self, flushing: bool) {
        self.inner.flushing.store(flushing, Ordering::Release);
        if flushing {
            while self.pop().is_some() {}
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus").field("queued", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_post_and_pop_in_order() {
        let bus = Bus::default();
        assert!(bus.pop().is_none());
        bus.post(Message::warning("a", "first"));
        bus.post(Message::eos("b"));
        assert_eq!(bus.len(), 2);
        assert_eq!(bus.pop().unwrap().source(), "a");
        assert!(bus.pop().unwrap().is_eos());
    }

    #[test]
    fn test_timed_pop_waits_for_other_thread() {
        let bus = Bus::default();
        let poster = {
            let bus = bus.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                bus.post(Message::error("src", "boom", None));
            })
        };
        let msg = bus.timed_pop(Some(Duration::from_secs(2))).unwrap();
        assert!(msg.is_error());
        assert_eq!(msg.to_string(), "Error in src: boom");
        poster.join().unwrap();
        assert!(bus.timed_pop(Some(Duration::from_millis(5))).is_none());
    }

    #[test]
    fn test_filtered_pop_skips_other_messages() {
        let bus = Bus::default();
        bus.post(Message::warning("a", "ignored"));
        bus.post(Message::eos("b"));
        let msg = bus
            .timed_pop_filtered(Some(Duration::from_millis(50)), Message::is_eos)
            .unwrap();
        assert_eq!(msg.source(), "b");
        assert!(bus.is_empty());
    }

    #[test]
    fn test_sync_handler_can_drop() {
        let bus = Bus::default();
        bus.set_sync_handler(|msg: &Message| {
            if msg.is_error() {
                BusSyncReply::Drop
            } else {
                BusSyncReply::Pass
            }
        });
        assert!(!bus.post(Message::error("x", "dropped", None)));
        assert!(bus.post(Message::eos("x")));
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_bounded_bus_drops_when_full() {
        let bus = Bus::new(BusConfig::default().with_capacity(1));
        assert!(bus.post(Message::eos("a")));
        assert!(!bus.post(Message::eos("b")));
        assert_eq!(bus.pop().unwrap().source(), "a");
    }

    #[test]
    fn test_flushing_discards() {
        let bus = Bus::default();
        bus.post(Message::eos("a"));
        bus.set_flushing(true);
        assert!(bus.is_empty());
        assert!(!bus.post(Message::eos("b")));
        bus.set_flushing(false);
        assert!(bus.post(Message::eos("c")));
    }
}
