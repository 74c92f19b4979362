//! Pads: the connection points of elements.
//!
//! A source pad links to exactly one sink pad. Data moves across the link
//! in one of two modes:
//!
//! - **Push**: the source calls [`Pad::push`], which runs the sink's chain
//!   function on the calling thread.
//! - **Pull**: the sink calls [`Pad::pull_range`], which runs the source's
//!   getrange function on the calling thread.
//!
//! Events and queries travel along the same links outside the flow-return
//! vocabulary. Sticky events (stream-start, caps, segment, EOS) are stored
//! on the pad and replayed to a newly linked peer before the next buffer.
//!
//! ```text
//!  unlinked ──link──▶ linked-inactive ──activate──▶ linked-active-{push,pull}
//!     ▲                   │      ▲                          │
//!     └──────unlink───────┘      └─────────deactivate───────┘
//! ```
//!
//! Pad state is guarded by a per-pad lock that is never held while a hook
//! runs, so hooks are free to push, pull and send events themselves.

use super::instance::{Element, WeakElement};
use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::error::{Error, Result};
use crate::event::{Event, Query};
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::metadata::BufferFlags;
use crate::negotiation::{self, NegotiationError};
use crate::observability::{PadMetrics, record_flow_error};
use crate::sync::lock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use thiserror::Error;
use tracing::{debug, trace, warn};

// ============================================================================
// Direction, presence, templates
// ============================================================================

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces data (output).
    Src,
    /// Consumes data (input).
    Sink,
}

/// Whether a pad is always present or created on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Pad is always present on the element.
    Always,
    /// Pad appears depending on the stream (e.g. demuxers).
    Sometimes,
    /// Pad is created when requested (e.g. muxer inputs).
    Request,
}

/// Static description of the pads an element can have.
///
/// The caps are everything the pad could ever accept or produce;
/// negotiation never looks beyond them plus runtime-narrowed caps.
#[derive(Debug, Clone, PartialEq)]
pub struct PadTemplate {
    name_template: String,
    direction: PadDirection,
    presence: PadPresence,
    caps: Caps,
}

impl PadTemplate {
    /// Create a new pad template.
    pub fn new(
        name_template: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: Caps,
    ) -> Self {
        Self {
            name_template: name_template.into(),
            direction,
            presence,
            caps,
        }
    }

    /// Always-present sink template named `sink`.
    pub fn sink(caps: Caps) -> Self {
        Self::new("sink", PadDirection::Sink, PadPresence::Always, caps)
    }

    /// Always-present source template named `src`.
    pub fn src(caps: Caps) -> Self {
        Self::new("src", PadDirection::Src, PadPresence::Always, caps)
    }

    /// Name pattern, e.g. `sink_%u`.
    pub fn name_template(&self) -> &str {
        &self.name_template
    }

    /// Direction of pads created from this template.
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    /// Presence of pads created from this template.
    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    /// Template caps.
    pub fn caps(&self) -> &Caps {
        &self.caps
    }
}

// ============================================================================
// Mode, link state, errors
// ============================================================================

/// Scheduling mode a pad is activated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    /// Not active; no data may flow.
    #[default]
    None,
    /// Upstream pushes into the chain function.
    Push,
    /// Downstream pulls through the getrange function.
    Pull,
}

impl fmt::Display for PadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PadMode::None => "none",
            PadMode::Push => "push",
            PadMode::Pull => "pull",
        })
    }
}

/// Combined link and activation state of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadLinkState {
    /// No peer.
    Unlinked,
    /// Linked but not activated.
    LinkedInactive,
    /// Linked and active in push mode.
    LinkedActivePush,
    /// Linked and active in pull mode.
    LinkedActivePull,
}

/// Why two pads could not be linked or unlinked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PadLinkError {
    /// A link must go from a source pad to a sink pad.
    #[error("{src} -> {sink}: link must go from a source pad to a sink pad")]
    WrongDirection {
        /// Upstream pad name.
        src: String,
        /// Downstream pad name.
        sink: String,
    },

    /// One of the pads already has a peer.
    #[error("pad {pad} is already linked")]
    WasLinked {
        /// The linked pad.
        pad: String,
    },

    /// The pads' caps do not intersect.
    #[error("{src} -> {sink}: no common format")]
    NoFormat {
        /// Upstream pad name.
        src: String,
        /// Downstream pad name.
        sink: String,
    },

    /// The pads are not linked to each other.
    #[error("{src} is not linked to {sink}")]
    NotLinked {
        /// Upstream pad name.
        src: String,
        /// Downstream pad name.
        sink: String,
    },

    /// Active pads cannot be unlinked.
    #[error("pad {pad} is active")]
    Active {
        /// The active pad.
        pad: String,
    },
}

// ============================================================================
// Hooks
// ============================================================================

/// Push-mode data entry point of a sink pad. Owns the buffer.
pub type ChainFunction = Box<dyn Fn(&Pad, Buffer) -> FlowResult + Send + Sync>;

/// Pull-mode data entry point of a source pad: `(offset, size)`.
pub type GetRangeFunction =
    Box<dyn Fn(&Pad, u64, usize) -> std::result::Result<Buffer, FlowError> + Send + Sync>;

/// Event handler. Returns whether the event was handled.
pub type EventFunction = Box<dyn Fn(&Pad, Event) -> bool + Send + Sync>;

/// Query handler. Fills in the answer and returns whether it did.
pub type QueryFunction = Box<dyn Fn(&Pad, &mut Query) -> bool + Send + Sync>;

/// Chooses a scheduling mode and activates the pad in it.
pub type ActivateFunction = Box<dyn Fn(&Pad) -> bool + Send + Sync>;

/// Notified when the pad is (de)activated in a mode; may refuse.
pub type ActivateModeFunction = Box<dyn Fn(&Pad, PadMode, bool) -> bool + Send + Sync>;

#[derive(Default)]
struct Hooks {
    chain: Option<ChainFunction>,
    getrange: Option<GetRangeFunction>,
    event: Option<EventFunction>,
    query: Option<QueryFunction>,
    activate: Option<ActivateFunction>,
    activatemode: Option<ActivateModeFunction>,
}

// ============================================================================
// Pad
// ============================================================================

struct StickyEvent {
    event: Event,
    /// Delivered to the current peer.
    sent: bool,
}

struct PadState {
    peer: Option<Weak<PadInner>>,
    mode: PadMode,
    flushing: bool,
    eos: bool,
    caps: Option<Caps>,
    /// Ordered by sticky rank, at most one per rank.
    sticky: Vec<StickyEvent>,
    /// Fatal result of the last push; repeated until flush or new caps.
    last_fatal: Option<FlowError>,
    /// Offset the next contiguous pull should ask for.
    next_offset: Option<u64>,
    discont_pending: bool,
    needs_reconfigure: bool,
    internal_links: Vec<Weak<PadInner>>,
    filter: Option<Caps>,
}

impl PadState {
    fn peer(&self) -> Option<Pad> {
        self.peer.as_ref().and_then(Weak::upgrade).map(Pad::from_inner)
    }

    fn store_sticky(&mut self, event: &Event) {
        let Some(rank) = event.sticky_rank() else {
            return;
        };
        let entry = StickyEvent {
            event: event.clone(),
            sent: false,
        };
        match self
            .sticky
            .iter()
            .position(|s| s.event.sticky_rank() >= Some(rank))
        {
            Some(i) if self.sticky[i].event.sticky_rank() == Some(rank) => self.sticky[i] = entry,
            Some(i) => self.sticky.insert(i, entry),
            None => self.sticky.push(entry),
        }
    }

    fn remove_sticky(&mut self, keep: impl Fn(&Event) -> bool) {
        self.sticky.retain(|s| keep(&s.event));
    }

    fn reset_flush(&mut self) {
        self.flushing = false;
        self.eos = false;
        self.last_fatal = None;
        self.next_offset = None;
        self.discont_pending = true;
        self.remove_sticky(|e| !matches!(e, Event::Eos | Event::Segment(_)));
    }
}

pub(crate) struct PadInner {
    name: String,
    direction: PadDirection,
    template: PadTemplate,
    proxy_caps: bool,
    hooks: Hooks,
    state: Mutex<PadState>,
    in_push: AtomicBool,
    parent: OnceLock<WeakElement>,
    metrics: PadMetrics,
}

/// A connection endpoint on an element. Cloning yields another handle to
/// the same pad.
#[derive(Clone)]
pub struct Pad {
    inner: Arc<PadInner>,
}

impl PartialEq for Pad {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Pad {}

/// Resets the push re-entrancy flag when a push returns or unwinds.
struct PushGuard<'a>(&'a AtomicBool);

impl Drop for PushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Pad {
    /// Start building a pad with an ANY, always-present template.
    pub fn builder(name: impl Into<String>, direction: PadDirection) -> PadBuilder {
        let name = name.into();
        let template = PadTemplate::new(
            name.clone(),
            direction,
            PadPresence::Always,
            Caps::new_any(),
        );
        PadBuilder::new(name, template)
    }

    /// Start building a pad from a template.
    pub fn builder_from_template(template: &PadTemplate, name: impl Into<String>) -> PadBuilder {
        PadBuilder::new(name.into(), template.clone())
    }

    fn from_inner(inner: Arc<PadInner>) -> Self {
        Self { inner }
    }

    fn downgrade(&self) -> Weak<PadInner> {
        Arc::downgrade(&self.inner)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Pad name, unique within its element.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Pad direction.
    pub fn direction(&self) -> PadDirection {
        self.inner.direction
    }

    /// Check if this is a source pad.
    pub fn is_src(&self) -> bool {
        self.inner.direction == PadDirection::Src
    }

    /// Check if this is a sink pad.
    pub fn is_sink(&self) -> bool {
        self.inner.direction == PadDirection::Sink
    }

    /// The template this pad was created from.
    pub fn template(&self) -> &PadTemplate {
        &self.inner.template
    }

    /// Template caps narrowed by the link filter.
    pub fn template_caps(&self) -> Caps {
        let filter = lock(&self.inner.state).filter.clone();
        match filter {
            Some(filter) => filter.intersect(self.inner.template.caps()),
            None => self.inner.template.caps().clone(),
        }
    }

    /// Currently negotiated caps.
    pub fn caps(&self) -> Option<Caps> {
        lock(&self.inner.state).caps.clone()
    }

    /// Linked peer.
    pub fn peer(&self) -> Option<Pad> {
        lock(&self.inner.state).peer()
    }

    /// Check if the pad has a peer.
    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    /// Scheduling mode, `None` when inactive.
    pub fn mode(&self) -> PadMode {
        lock(&self.inner.state).mode
    }

    /// Check if the pad is activated in any mode.
    pub fn is_active(&self) -> bool {
        self.mode() != PadMode::None
    }

    /// Check if the pad is flushing. Inactive pads are always flushing.
    pub fn is_flushing(&self) -> bool {
        lock(&self.inner.state).flushing
    }

    /// Check if EOS went through this pad since the last flush.
    pub fn is_eos(&self) -> bool {
        lock(&self.inner.state).eos
    }

    /// Combined link and activation state.
    pub fn link_state(&self) -> PadLinkState {
        let state = lock(&self.inner.state);
        match (state.peer().is_some(), state.mode) {
            (false, _) => PadLinkState::Unlinked,
            (true, PadMode::None) => PadLinkState::LinkedInactive,
            (true, PadMode::Push) => PadLinkState::LinkedActivePush,
            (true, PadMode::Pull) => PadLinkState::LinkedActivePull,
        }
    }

    /// Stored sticky events, in replay order.
    pub fn sticky_events(&self) -> Vec<Event> {
        lock(&self.inner.state)
            .sticky
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Element owning this pad.
    pub fn parent_element(&self) -> Option<Element> {
        self.inner.parent.get().and_then(WeakElement::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: WeakElement) -> bool {
        self.inner.parent.set(parent).is_ok()
    }

    /// Pads of the same element that events and queries are forwarded to
    /// by the default handlers.
    pub fn set_internal_links(&self, pads: &[Pad]) {
        lock(&self.inner.state).internal_links = pads.iter().map(Pad::downgrade).collect();
    }

    /// Current internal links.
    pub fn internal_links(&self) -> Vec<Pad> {
        lock(&self.inner.state)
            .internal_links
            .iter()
            .filter_map(Weak::upgrade)
            .map(Pad::from_inner)
            .collect()
    }

    /// Clear and return the reconfigure request set by an upstream
    /// reconfigure event.
    pub fn check_reconfigure(&self) -> bool {
        std::mem::take(&mut lock(&self.inner.state).needs_reconfigure)
    }

    /// Metrics bound to this pad.
    pub fn metrics(&self) -> &PadMetrics {
        &self.inner.metrics
    }

    // ------------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------------

    /// Link this source pad to a sink pad.
    pub fn link(&self, sink: &Pad) -> std::result::Result<(), PadLinkError> {
        self.link_filtered(sink, None)
    }

    /// Link with an extra caps filter that both pads must satisfy.
    ///
    /// Fails if the directions are wrong, if either pad is already linked,
    /// or if the pads' caps (narrowed by `filter`) do not intersect.
    pub fn link_filtered(
        &self,
        sink: &Pad,
        filter: Option<&Caps>,
    ) -> std::result::Result<(), PadLinkError> {
        if !self.is_src() || !sink.is_sink() {
            return Err(PadLinkError::WrongDirection {
                src: self.name().to_string(),
                sink: sink.name().to_string(),
            });
        }
        for pad in [self, sink] {
            if pad.is_linked() {
                return Err(PadLinkError::WasLinked {
                    pad: pad.name().to_string(),
                });
            }
        }

        let src_caps = self.query_caps(filter);
        let sink_caps = sink.query_caps(filter);
        if !src_caps.can_intersect(&sink_caps) {
            debug!(src = %self.name(), sink = %sink.name(), %src_caps, %sink_caps, "link refused: no common format");
            return Err(PadLinkError::NoFormat {
                src: self.name().to_string(),
                sink: sink.name().to_string(),
            });
        }

        // Lock order: source before sink.
        let mut src_state = lock(&self.inner.state);
        let mut sink_state = lock(&sink.inner.state);
        if src_state.peer().is_some() {
            return Err(PadLinkError::WasLinked {
                pad: self.name().to_string(),
            });
        }
        if sink_state.peer().is_some() {
            return Err(PadLinkError::WasLinked {
                pad: sink.name().to_string(),
            });
        }
        src_state.peer = Some(sink.downgrade());
        sink_state.peer = Some(self.downgrade());
        src_state.filter = filter.cloned();
        sink_state.filter = filter.cloned();
        for sticky in &mut src_state.sticky {
            sticky.sent = false;
        }
        drop(sink_state);
        drop(src_state);

        debug!(src = %self.name(), sink = %sink.name(), "linked");
        Ok(())
    }

    /// Unlink this source pad from `sink`. Both pads must be inactive.
    pub fn unlink(&self, sink: &Pad) -> std::result::Result<(), PadLinkError> {
        if self.peer().as_ref() != Some(sink) {
            return Err(PadLinkError::NotLinked {
                src: self.name().to_string(),
                sink: sink.name().to_string(),
            });
        }
        for pad in [self, sink] {
            if pad.is_active() {
                return Err(PadLinkError::Active {
                    pad: pad.name().to_string(),
                });
            }
        }

        let mut src_state = lock(&self.inner.state);
        let mut sink_state = lock(&sink.inner.state);
        src_state.peer = None;
        sink_state.peer = None;
        src_state.filter = None;
        sink_state.filter = None;
        drop(sink_state);
        drop(src_state);

        debug!(src = %self.name(), sink = %sink.name(), "unlinked");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------------

    /// Activate or deactivate in the default way.
    ///
    /// Activating an already active pad does nothing. Otherwise the
    /// activate function chooses the mode; without one the pad is activated
    /// in push mode.
    pub fn set_active(&self, active: bool) -> Result<()> {
        let mode = self.mode();
        if active {
            if mode != PadMode::None {
                return Ok(());
            }
            match &self.inner.hooks.activate {
                Some(activate) => {
                    if activate(self) {
                        Ok(())
                    } else {
                        Err(self.activation_error("activate", "activate function failed"))
                    }
                }
                None => self.activate_mode(PadMode::Push, true),
            }
        } else if mode == PadMode::None {
            Ok(())
        } else {
            self.activate_mode(mode, false)
        }
    }

    /// Activate or deactivate in a specific mode.
    ///
    /// Activating a sink pad in pull mode first activates its peer source
    /// pad in pull mode. Deactivation marks the pad flushing before the
    /// activate-mode function runs, so that blocked streaming threads can be
    /// woken by it, and clears the negotiated caps and sticky events.
    pub fn activate_mode(&self, mode: PadMode, active: bool) -> Result<()> {
        if mode == PadMode::None {
            return self.set_active(false);
        }
        let current = self.mode();

        if !active {
            if current != mode {
                return Ok(());
            }
            return self.deactivate(mode);
        }

        if current == mode {
            return Ok(());
        }
        if current != PadMode::None {
            self.deactivate(current)?;
        }

        if mode == PadMode::Pull {
            match self.direction() {
                PadDirection::Sink => {
                    let peer = self
                        .peer()
                        .ok_or_else(|| self.activation_error("activate", "pull mode requires a peer"))?;
                    peer.activate_mode(PadMode::Pull, true)?;
                }
                PadDirection::Src => {
                    if self.inner.hooks.getrange.is_none() {
                        return Err(
                            self.activation_error("activate", "pull mode requires a getrange function")
                        );
                    }
                }
            }
        }

        {
            let mut state = lock(&self.inner.state);
            state.mode = mode;
            state.flushing = false;
            state.eos = false;
            state.last_fatal = None;
            state.next_offset = None;
            state.discont_pending = true;
        }

        if let Some(activatemode) = &self.inner.hooks.activatemode {
            if !activatemode(self, mode, true) {
                let mut state = lock(&self.inner.state);
                state.mode = PadMode::None;
                state.flushing = true;
                drop(state);
                return Err(self.activation_error("activate", "activate-mode function failed"));
            }
        }

        debug!(pad = %self.name(), %mode, "activated");
        Ok(())
    }

    fn deactivate(&self, mode: PadMode) -> Result<()> {
        lock(&self.inner.state).flushing = true;

        let accepted = match &self.inner.hooks.activatemode {
            Some(activatemode) => activatemode(self, mode, false),
            None => true,
        };

        {
            let mut state = lock(&self.inner.state);
            state.mode = PadMode::None;
            state.caps = None;
            state.sticky.clear();
            state.eos = false;
            state.last_fatal = None;
            state.next_offset = None;
        }

        if mode == PadMode::Pull && self.is_sink() {
            if let Some(peer) = self.peer() {
                peer.activate_mode(PadMode::Pull, false)?;
            }
        }

        debug!(pad = %self.name(), %mode, "deactivated");
        if accepted {
            Ok(())
        } else {
            Err(self.activation_error("deactivate", "activate-mode function failed"))
        }
    }

    fn activation_error(&self, action: &'static str, reason: &str) -> Error {
        Error::Activation {
            pad: self.name().to_string(),
            action,
            reason: reason.to_string(),
        }
    }

    // ------------------------------------------------------------------------
    // Push mode
    // ------------------------------------------------------------------------

    /// Push a buffer to the peer's chain function. Consumes the buffer.
    ///
    /// Pending sticky events are delivered first. If the buffer carries
    /// caps that differ from the pad's caps, a caps event is pushed and the
    /// buffer is dropped with `NotNegotiated` when the peer refuses it.
    ///
    /// After a fatal error, further pushes return the same error until a
    /// flush or new caps.
    ///
    /// # Panics
    ///
    /// Panics if called on a sink pad, or concurrently on the same pad
    /// from two threads.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        assert!(self.is_src(), "push on sink pad {}", self.name());
        let _guard = self.enter_push();

        let peer = {
            let state = lock(&self.inner.state);
            if state.mode != PadMode::Push || state.flushing {
                return self.interrupted(FlowError::Flushing);
            }
            if state.eos {
                return self.interrupted(FlowError::Eos);
            }
            if let Some(err) = state.last_fatal {
                warn!(pad = %self.name(), %err, "push after fatal flow error");
                return Err(err);
            }
            match state.peer() {
                Some(peer) => peer,
                None => return self.interrupted(FlowError::NotLinked),
            }
        };

        self.send_pending_sticky(&peer)?;

        if let Some(caps) = buffer.caps() {
            if self.caps().as_ref() != Some(caps) && !self.push_event(Event::Caps(caps.clone())) {
                return self.interrupted(FlowError::NotNegotiated);
            }
        }

        let bytes = buffer.len();
        match peer.chain(buffer) {
            Ok(success) => {
                self.inner.metrics.record_push(bytes);
                trace!(pad = %self.name(), bytes, "pushed buffer");
                Ok(success)
            }
            Err(err) if err.is_fatal() => {
                lock(&self.inner.state).last_fatal = Some(err);
                record_flow_error(err.kind());
                warn!(pad = %self.name(), %err, "downstream returned fatal flow error");
                Err(err)
            }
            Err(err) => self.interrupted(err),
        }
    }

    /// Push buffers in order, stopping at the first error.
    pub fn push_list(&self, buffers: impl IntoIterator<Item = Buffer>) -> FlowResult {
        let mut last = FlowSuccess::Ok;
        for buffer in buffers {
            last = self.push(buffer)?;
        }
        Ok(last)
    }

    /// Deliver a buffer into this sink pad's chain function, as the peer's
    /// push does.
    ///
    /// Returns `Flushing` if the pad is flushing or not active in push
    /// mode, `Eos` after EOS and `NotNegotiated` before caps were set.
    pub fn chain(&self, buffer: Buffer) -> FlowResult {
        {
            let state = lock(&self.inner.state);
            if state.mode != PadMode::Push || state.flushing {
                debug!(pad = %self.name(), mode = %state.mode, "refusing buffer: not accepting data");
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
            if state.caps.is_none() {
                debug!(pad = %self.name(), "refusing buffer: no caps");
                return Err(FlowError::NotNegotiated);
            }
        }
        match &self.inner.hooks.chain {
            Some(chain) => chain(self, buffer),
            None => {
                warn!(pad = %self.name(), "no chain function");
                Err(FlowError::Error)
            }
        }
    }

    fn enter_push(&self) -> PushGuard<'_> {
        let reentered = self.inner.in_push.swap(true, Ordering::Acquire);
        assert!(!reentered, "concurrent push on pad {}", self.name());
        PushGuard(&self.inner.in_push)
    }

    fn interrupted(&self, err: FlowError) -> FlowResult {
        record_flow_error(err.kind());
        debug!(pad = %self.name(), %err, "push interrupted");
        Err(err)
    }

    // ------------------------------------------------------------------------
    // Pull mode
    // ------------------------------------------------------------------------

    /// Pull `size` bytes at `offset` from the peer's getrange function.
    ///
    /// The result may be shorter near the end of the resource; past the end
    /// the peer returns `Eos`. The first buffer after activation or a flush,
    /// and any buffer not starting where the previous one ended, is flagged
    /// DISCONT.
    ///
    /// # Panics
    ///
    /// Panics if called on a source pad.
    pub fn pull_range(&self, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        assert!(self.is_sink(), "pull on source pad {}", self.name());
        let peer = {
            let state = lock(&self.inner.state);
            if state.mode != PadMode::Pull || state.flushing {
                return Err(FlowError::Flushing);
            }
            state.peer().ok_or(FlowError::NotLinked)?
        };

        let mut buffer = peer.get_range(offset, size)?;

        // Sticky events of the source travel with the data.
        peer.send_pending_sticky(self)?;

        let discont = {
            let mut state = lock(&self.inner.state);
            let discont = state.discont_pending || state.next_offset != Some(offset);
            state.discont_pending = false;
            state.next_offset = Some(offset.saturating_add(buffer.len() as u64));
            discont
        };
        if discont && !buffer.flags().contains(BufferFlags::DISCONT) {
            buffer = buffer.make_writable();
            if let Some(meta) = buffer.meta_mut() {
                meta.flags.insert(BufferFlags::DISCONT);
            }
        }

        self.inner.metrics.record_pull();
        trace!(pad = %self.name(), offset, bytes = buffer.len(), discont, "pulled buffer");
        Ok(buffer)
    }

    /// Run this source pad's getrange function, as the peer's pull does.
    ///
    /// Results longer than `size` are truncated.
    pub fn get_range(&self, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        {
            let state = lock(&self.inner.state);
            if state.mode != PadMode::Pull || state.flushing {
                return Err(FlowError::Flushing);
            }
        }
        let getrange = self.inner.hooks.getrange.as_ref().ok_or(FlowError::Error)?;
        let buffer = getrange(self, offset, size)?;
        if buffer.len() > size {
            let mut buffer = buffer.make_writable();
            buffer.set_size(size);
            return Ok(buffer);
        }
        Ok(buffer)
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Deliver an event into this pad.
    ///
    /// Sink pads take downstream events, source pads upstream ones. The pad
    /// updates its own flushing, EOS, caps and sticky state, then runs the
    /// event function (or [`event_default`](Self::event_default)).
    pub fn send_event(&self, event: Event) -> bool {
        let allowed = match self.direction() {
            PadDirection::Sink => event.is_downstream(),
            PadDirection::Src => event.is_upstream(),
        };
        if !allowed {
            warn!(pad = %self.name(), event = %event.name(), "event sent in the wrong direction");
            return false;
        }

        let event = match self.prepare_incoming(event) {
            Some(event) => event,
            None => return false,
        };

        let is_eos = matches!(event, Event::Eos);
        let sticky = event.is_sticky().then(|| event.clone());
        let handled = self.dispatch_event(event);

        let mut state = lock(&self.inner.state);
        if is_eos {
            state.eos = true;
        }
        if let (true, Some(sticky)) = (handled, sticky) {
            if let Event::Caps(caps) = &sticky {
                state.caps = Some(caps.clone());
            }
            state.store_sticky(&sticky);
            if let Some(stored) = state.sticky.iter_mut().find(|s| s.event == sticky) {
                stored.sent = true;
            }
        }
        handled
    }

    /// Apply the pad-level effects of an incoming event. Returns `None` if
    /// the event must be refused.
    fn prepare_incoming(&self, event: Event) -> Option<Event> {
        let mut state = lock(&self.inner.state);
        if matches!(event, Event::FlushStart) {
            state.flushing = true;
            return Some(event);
        }
        if matches!(event, Event::FlushStop(_)) {
            if state.mode == PadMode::None {
                debug!(pad = %self.name(), "flush-stop on inactive pad refused");
                return None;
            }
            state.reset_flush();
            return Some(event);
        }
        if matches!(event, Event::Reconfigure) {
            state.needs_reconfigure = true;
            return Some(event);
        }

        if event.is_serialized() && self.is_sink() {
            if state.flushing {
                debug!(pad = %self.name(), event = %event.name(), "refusing event while flushing");
                return None;
            }
            if state.eos && !matches!(event, Event::StreamStart(_)) {
                debug!(pad = %self.name(), event = %event.name(), "refusing event after EOS");
                return None;
            }
        }

        if let Event::Caps(caps) = &event {
            let template = match &state.filter {
                Some(filter) => filter.intersect(self.inner.template.caps()),
                None => self.inner.template.caps().clone(),
            };
            drop(state);
            return match negotiation::negotiate(&template, caps) {
                Ok(accepted) => Some(Event::Caps(accepted)),
                Err(err) => {
                    warn!(pad = %self.name(), %err, "caps refused");
                    None
                }
            };
        }
        Some(event)
    }

    fn dispatch_event(&self, event: Event) -> bool {
        match &self.inner.hooks.event {
            Some(handler) => handler(self, event),
            None => self.event_default(event),
        }
    }

    /// Forward an event to every internally linked pad of the same element.
    ///
    /// Returns true if any forward succeeded, or if there is nowhere to
    /// forward to.
    pub fn event_default(&self, event: Event) -> bool {
        let links = self.internal_links();
        if links.is_empty() {
            return true;
        }
        let mut handled = false;
        for pad in links {
            handled |= pad.push_event(event.clone());
        }
        handled
    }

    /// Send an event out of this pad to its peer.
    ///
    /// Source pads push downstream events, sink pads upstream ones. Sticky
    /// events are stored first; on an unlinked pad they stay stored and
    /// `true` is returned. Pending sticky events are delivered before the
    /// event itself.
    pub fn push_event(&self, event: Event) -> bool {
        let allowed = match self.direction() {
            PadDirection::Src => event.is_downstream(),
            PadDirection::Sink => event.is_upstream(),
        };
        if !allowed {
            warn!(pad = %self.name(), event = %event.name(), "event pushed in the wrong direction");
            return false;
        }

        if self.is_sink() {
            return match self.peer() {
                Some(peer) => peer.send_event(event),
                None => false,
            };
        }

        let peer = {
            let mut state = lock(&self.inner.state);
            match &event {
                Event::FlushStart => state.flushing = true,
                Event::FlushStop(_) => {
                    if state.mode != PadMode::None {
                        state.reset_flush();
                    }
                }
                _ if event.is_serialized() => {
                    if state.flushing && state.mode != PadMode::None {
                        debug!(pad = %self.name(), event = %event.name(), "not pushing event while flushing");
                        return false;
                    }
                    if state.eos && !matches!(event, Event::StreamStart(_)) {
                        debug!(pad = %self.name(), event = %event.name(), "not pushing event after EOS");
                        return false;
                    }
                }
                _ => {}
            }
            if matches!(event, Event::StreamStart(_)) {
                state.eos = false;
            }
            state.store_sticky(&event);
            state.peer()
        };

        let Some(peer) = peer else {
            if let Event::Caps(caps) = &event {
                lock(&self.inner.state).caps = Some(caps.clone());
            }
            return event.is_sticky();
        };

        if !event.is_sticky() {
            // Serialized data-flow events go out after the sticky state.
            // Flush events and out-of-band events go out immediately.
            let after_sticky =
                event.is_serialized() && !matches!(event, Event::FlushStop(_));
            if after_sticky && self.send_pending_sticky(&peer).is_err() {
                return false;
            }
            return peer.send_event(event);
        }

        let delivered = self.send_pending_sticky(&peer).is_ok() && self.sticky_sent(&event);
        if delivered {
            let mut state = lock(&self.inner.state);
            match &event {
                Event::Caps(caps) => {
                    state.caps = Some(caps.clone());
                    state.last_fatal = None;
                }
                Event::Eos => state.eos = true,
                _ => {}
            }
        }
        delivered
    }

    fn sticky_sent(&self, event: &Event) -> bool {
        lock(&self.inner.state)
            .sticky
            .iter()
            .any(|s| s.sent && s.event == *event)
    }

    /// Deliver stored sticky events the peer has not seen yet, in order.
    fn send_pending_sticky(&self, peer: &Pad) -> std::result::Result<(), FlowError> {
        loop {
            let next = lock(&self.inner.state)
                .sticky
                .iter()
                .find(|s| !s.sent)
                .map(|s| s.event.clone());
            let Some(event) = next else {
                return Ok(());
            };

            let ok = peer.send_event(event.clone());
            if !ok {
                if peer.is_flushing() {
                    return Err(FlowError::Flushing);
                }
                if matches!(event, Event::Caps(_)) {
                    warn!(pad = %self.name(), "peer refused sticky caps");
                    return Err(FlowError::NotNegotiated);
                }
                if matches!(event, Event::Eos) {
                    return Err(FlowError::Eos);
                }
                debug!(pad = %self.name(), event = %event.name(), "peer refused sticky event");
            }

            let mut state = lock(&self.inner.state);
            if let Some(stored) = state.sticky.iter_mut().find(|s| s.event == event) {
                stored.sent = true;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Run a query on this pad.
    pub fn query(&self, query: &mut Query) -> bool {
        match &self.inner.hooks.query {
            Some(handler) => handler(self, query),
            None => self.query_default(query),
        }
    }

    /// Run a query on the peer. False when unlinked.
    pub fn peer_query(&self, query: &mut Query) -> bool {
        match self.peer() {
            Some(peer) => peer.query(query),
            None => false,
        }
    }

    /// Default query handling.
    ///
    /// - caps: template caps narrowed by the link filter and the query
    ///   filter; proxying pads also narrow by what the peers of their
    ///   internal links accept
    /// - accept-caps: fixed and a subset of the template caps
    /// - anything else: forwarded to the peers of the internal links
    pub fn query_default(&self, query: &mut Query) -> bool {
        match query {
            Query::Caps { filter, result } => {
                let mut caps = self.template_caps();
                if let Some(filter) = filter.as_ref() {
                    caps = filter.intersect(&caps);
                }
                if self.inner.proxy_caps {
                    for pad in self.internal_links() {
                        if pad.is_linked() {
                            caps = pad.peer_query_caps(Some(&caps));
                        }
                    }
                }
                *result = Some(caps);
                true
            }
            Query::AcceptCaps { caps, result } => {
                *result = negotiation::accepts(&self.template_caps(), caps);
                true
            }
            _ => self
                .internal_links()
                .iter()
                .any(|pad| pad.peer_query(query)),
        }
    }

    /// Caps this pad can handle, narrowed by `filter`.
    pub fn query_caps(&self, filter: Option<&Caps>) -> Caps {
        let mut query = Query::new_caps(filter.cloned());
        if self.query(&mut query) {
            if let Some(caps) = query.caps_result() {
                return caps.clone();
            }
        }
        match filter {
            Some(filter) => filter.intersect(&self.template_caps()),
            None => self.template_caps(),
        }
    }

    /// Caps the peer can handle. ANY (narrowed by `filter`) when unlinked.
    pub fn peer_query_caps(&self, filter: Option<&Caps>) -> Caps {
        match self.peer() {
            Some(peer) => peer.query_caps(filter),
            None => filter.cloned().unwrap_or_else(Caps::new_any),
        }
    }

    /// Ask whether the pad would accept `caps`.
    pub fn query_accept_caps(&self, caps: &Caps) -> bool {
        let mut query = Query::new_accept_caps(caps.clone());
        self.query(&mut query) && matches!(query, Query::AcceptCaps { result: true, .. })
    }

    /// Negotiate caps with the peer and push them.
    ///
    /// Intersects this source pad's template caps with what the peer
    /// accepts, fixates the result and pushes a caps event.
    pub fn negotiate(&self) -> std::result::Result<Caps, NegotiationError> {
        self.negotiate_with(|caps| caps.fixate())
    }

    /// Like [`negotiate`](Self::negotiate) with element-directed fixation.
    pub fn negotiate_with<F>(&self, fixate: F) -> std::result::Result<Caps, NegotiationError>
    where
        F: FnOnce(&Caps) -> Option<Caps>,
    {
        let template = self.template_caps();
        let peer_caps = self.peer_query_caps(Some(&template));
        let caps = negotiation::negotiate_with(&template, &peer_caps, fixate)?;
        if self.push_event(Event::Caps(caps.clone())) {
            Ok(caps)
        } else {
            Err(NegotiationError::Refused {
                pad: self.name().to_string(),
                caps: caps.to_string(),
            })
        }
    }
}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("Pad")
            .field("name", &self.inner.name)
            .field("direction", &self.inner.direction)
            .field("mode", &state.mode)
            .field("flushing", &state.flushing)
            .field("caps", &state.caps)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Pad`]. Hooks can only be set here, before the pad is
/// shared.
pub struct PadBuilder {
    name: String,
    template: PadTemplate,
    hooks: Hooks,
    proxy_caps: bool,
}

impl PadBuilder {
    fn new(name: String, template: PadTemplate) -> Self {
        Self {
            name,
            template,
            hooks: Hooks::default(),
            proxy_caps: false,
        }
    }

    /// Set the chain function (sink pads).
    pub fn chain_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, Buffer) -> FlowResult + Send + Sync + 'static,
    {
        self.hooks.chain = Some(Box::new(f));
        self
    }

    /// Set the getrange function (source pads).
    pub fn getrange_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, u64, usize) -> std::result::Result<Buffer, FlowError> + Send + Sync + 'static,
    {
        self.hooks.getrange = Some(Box::new(f));
        self
    }

    /// Set the event function.
    pub fn event_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, Event) -> bool + Send + Sync + 'static,
    {
        self.hooks.event = Some(Box::new(f));
        self
    }

    /// Set the query function.
    pub fn query_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, &mut Query) -> bool + Send + Sync + 'static,
    {
        self.hooks.query = Some(Box::new(f));
        self
    }

    /// Set the activate function.
    pub fn activate_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad) -> bool + Send + Sync + 'static,
    {
        self.hooks.activate = Some(Box::new(f));
        self
    }

    /// Set the activate-mode function.
    pub fn activatemode_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, PadMode, bool) -> bool + Send + Sync + 'static,
    {
        self.hooks.activatemode = Some(Box::new(f));
        self
    }

    /// Answer caps queries with what the peers of the internal links
    /// accept, for elements that pass caps through unchanged.
    pub fn proxy_caps(mut self, proxy: bool) -> Self {
        self.proxy_caps = proxy;
        self
    }

    /// Finish.
    pub fn build(self) -> Pad {
        let metrics = PadMetrics::new(&self.name);
        Pad::from_inner(Arc::new(PadInner {
            direction: self.template.direction(),
            name: self.name,
            template: self.template,
            proxy_caps: self.proxy_caps,
            hooks: self.hooks,
            state: Mutex::new(PadState {
                peer: None,
                mode: PadMode::None,
                flushing: true,
                eos: false,
                caps: None,
                sticky: Vec::new(),
                last_fatal: None,
                next_offset: None,
                discont_pending: true,
                needs_reconfigure: false,
                internal_links: Vec::new(),
                filter: None,
            }),
            in_push: AtomicBool::new(false),
            parent: OnceLock::new(),
            metrics,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StreamStartEvent;
    use std::sync::atomic::AtomicUsize;

    fn caps(s: &str) -> Caps {
        s.parse().unwrap()
    }

    fn counting_sink(count: Arc<AtomicUsize>) -> Pad {
        Pad::builder("sink", PadDirection::Sink)
            .chain_function(move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(FlowSuccess::Ok)
            })
            .build()
    }

    fn active_pair(count: Arc<AtomicUsize>) -> (Pad, Pad) {
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = counting_sink(count);
        src.link(&sink).unwrap();
        sink.set_active(true).unwrap();
        src.set_active(true).unwrap();
        (src, sink)
    }

    #[test]
    fn test_link_checks_direction_and_peers() {
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = Pad::builder("sink", PadDirection::Sink).build();
        let other = Pad::builder("other", PadDirection::Sink).build();

        assert!(matches!(
            sink.link(&src),
            Err(PadLinkError::WrongDirection { .. })
        ));
        assert_eq!(src.link_state(), PadLinkState::Unlinked);

        src.link(&sink).unwrap();
        assert_eq!(src.peer(), Some(sink.clone()));
        assert_eq!(src.link_state(), PadLinkState::LinkedInactive);
        assert!(matches!(src.link(&other), Err(PadLinkError::WasLinked { .. })));

        src.unlink(&sink).unwrap();
        assert!(!src.is_linked());
        assert!(!sink.is_linked());
    }

    #[test]
    fn test_link_requires_common_caps() {
        let src = Pad::builder_from_template(&PadTemplate::src(caps("audio/x-raw")), "src").build();
        let sink =
            Pad::builder_from_template(&PadTemplate::sink(caps("video/x-raw")), "sink").build();
        assert!(matches!(src.link(&sink), Err(PadLinkError::NoFormat { .. })));

        let any_sink = Pad::builder("sink", PadDirection::Sink).build();
        assert!(matches!(
            src.link_filtered(&any_sink, Some(&caps("video/x-raw"))),
            Err(PadLinkError::NoFormat { .. })
        ));
        src.link_filtered(&any_sink, Some(&caps("audio/x-raw, rate=48000")))
            .unwrap();
        assert_eq!(any_sink.template_caps(), caps("audio/x-raw, rate=48000"));
    }

    #[test]
    fn test_unlink_active_pad_is_refused() {
        let (src, sink) = active_pair(Arc::new(AtomicUsize::new(0)));
        assert!(matches!(src.unlink(&sink), Err(PadLinkError::Active { .. })));
        src.set_active(false).unwrap();
        sink.set_active(false).unwrap();
        src.unlink(&sink).unwrap();
    }

    #[test]
    fn test_push_requires_active_linked_negotiated() {
        let count = Arc::new(AtomicUsize::new(0));
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = counting_sink(Arc::clone(&count));

        assert_eq!(src.push(Buffer::from_slice(b"x")), Err(FlowError::Flushing));
        src.set_active(true).unwrap();
        assert_eq!(src.push(Buffer::from_slice(b"x")), Err(FlowError::NotLinked));

        src.link(&sink).unwrap();
        assert_eq!(src.push(Buffer::from_slice(b"x")), Err(FlowError::Flushing));

        sink.set_active(true).unwrap();
        assert_eq!(
            src.push(Buffer::from_slice(b"x")),
            Err(FlowError::NotNegotiated)
        );

        assert!(src.push_event(Event::Caps(caps("x/y"))));
        assert_eq!(src.push(Buffer::from_slice(b"x")), Ok(FlowSuccess::Ok));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sink.caps(), Some(caps("x/y")));
    }

    #[test]
    fn test_sticky_events_replayed_to_new_peer() {
        let count = Arc::new(AtomicUsize::new(0));
        let src = Pad::builder("src", PadDirection::Src).build();
        src.set_active(true).unwrap();
        assert!(src.push_event(Event::Caps(caps("x/y"))));
        assert!(src.push_event(Event::StreamStart(StreamStartEvent::new("s"))));

        let stored = src.sticky_events();
        assert_eq!(stored.len(), 2);
        assert!(matches!(stored[0], Event::StreamStart(_)));

        let sink = counting_sink(Arc::clone(&count));
        src.link(&sink).unwrap();
        sink.set_active(true).unwrap();
        assert_eq!(src.push(Buffer::from_slice(b"x")), Ok(FlowSuccess::Ok));
        assert_eq!(sink.caps(), Some(caps("x/y")));
        assert_eq!(sink.sticky_events().len(), 2);
    }

    #[test]
    fn test_caps_change_on_buffer_negotiates_first() {
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = Pad::builder_from_template(
            &PadTemplate::sink(caps("x/y, rate=[1, 10]")),
            "sink",
        )
        .chain_function(|_, _| Ok(FlowSuccess::Ok))
        .build();
        src.link(&sink).unwrap();
        sink.set_active(true).unwrap();
        src.set_active(true).unwrap();

        let ok = Buffer::from_slice(b"a").with_caps(caps("x/y, rate=5"));
        assert_eq!(src.push(ok), Ok(FlowSuccess::Ok));
        assert_eq!(sink.caps(), Some(caps("x/y, rate=5")));

        let bad = Buffer::from_slice(b"b").with_caps(caps("x/y, rate=50"));
        let shared = bad.clone();
        assert_eq!(src.push(bad), Err(FlowError::NotNegotiated));
        // The pad consumed its reference.
        assert_eq!(shared.ref_count(), 1);
        assert_eq!(sink.caps(), Some(caps("x/y, rate=5")));
    }

    #[test]
    fn test_fatal_error_short_circuits_until_flush() {
        let calls = Arc::new(AtomicUsize::new(0));
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = {
            let calls = Arc::clone(&calls);
            Pad::builder("sink", PadDirection::Sink)
                .chain_function(move |_, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FlowError::Error)
                })
                .build()
        };
        src.link(&sink).unwrap();
        sink.set_active(true).unwrap();
        src.set_active(true).unwrap();
        src.push_event(Event::Caps(caps("x/y")));

        assert_eq!(src.push(Buffer::from_slice(b"a")), Err(FlowError::Error));
        assert_eq!(src.push(Buffer::from_slice(b"b")), Err(FlowError::Error));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(src.push_event(Event::FlushStart));
        assert!(src.push_event(Event::FlushStop(Default::default())));
        assert_eq!(src.push(Buffer::from_slice(b"c")), Err(FlowError::Error));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flush_start_refuses_data_until_flush_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let (src, sink) = active_pair(Arc::clone(&count));
        src.push_event(Event::Caps(caps("x/y")));

        assert!(sink.send_event(Event::FlushStart));
        assert!(sink.is_flushing());
        assert_eq!(sink.chain(Buffer::from_slice(b"a")), Err(FlowError::Flushing));
        assert!(!sink.send_event(Event::Eos));

        assert!(sink.send_event(Event::FlushStop(Default::default())));
        assert_eq!(sink.chain(Buffer::from_slice(b"a")), Ok(FlowSuccess::Ok));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eos_blocks_data_until_flush_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let (src, sink) = active_pair(Arc::clone(&count));
        src.push_event(Event::Caps(caps("x/y")));
        assert!(src.push_event(Event::Eos));
        assert!(sink.is_eos());
        assert_eq!(src.push(Buffer::from_slice(b"a")), Err(FlowError::Eos));

        src.push_event(Event::FlushStart);
        src.push_event(Event::FlushStop(Default::default()));
        assert!(!sink.is_eos());
        assert_eq!(src.push(Buffer::from_slice(b"a")), Ok(FlowSuccess::Ok));
    }

    #[test]
    fn test_deactivation_clears_negotiated_state() {
        let (src, sink) = active_pair(Arc::new(AtomicUsize::new(0)));
        src.push_event(Event::Caps(caps("x/y")));
        assert!(sink.caps().is_some());

        sink.set_active(false).unwrap();
        assert!(sink.caps().is_none());
        assert!(sink.sticky_events().is_empty());
        assert!(sink.is_flushing());
        assert!(!sink.send_event(Event::FlushStop(Default::default())));
    }

    #[test]
    fn test_activate_mode_hook_can_refuse() {
        let pad = Pad::builder("sink", PadDirection::Sink)
            .activatemode_function(|_, mode, active| !(active && mode == PadMode::Push))
            .build();
        assert!(pad.set_active(true).is_err());
        assert_eq!(pad.mode(), PadMode::None);
        assert!(pad.is_flushing());
    }

    #[test]
    fn test_pull_mode_activation_reaches_upstream() {
        let src = Pad::builder("src", PadDirection::Src)
            .getrange_function(|_, _, size| Ok(Buffer::from_vec(vec![7; size + 2])))
            .build();
        let sink = Pad::builder("sink", PadDirection::Sink).build();

        assert!(sink.activate_mode(PadMode::Pull, true).is_err());
        src.link(&sink).unwrap();
        sink.activate_mode(PadMode::Pull, true).unwrap();
        assert_eq!(src.mode(), PadMode::Pull);
        assert_eq!(sink.link_state(), PadLinkState::LinkedActivePull);

        // Oversized results are truncated.
        let first = sink.pull_range(0, 4).unwrap();
        assert_eq!(first.len(), 4);
        assert!(first.flags().contains(BufferFlags::DISCONT));

        let second = sink.pull_range(4, 4).unwrap();
        assert!(!second.flags().contains(BufferFlags::DISCONT));

        let jump = sink.pull_range(100, 4).unwrap();
        assert!(jump.flags().contains(BufferFlags::DISCONT));

        sink.activate_mode(PadMode::Pull, false).unwrap();
        assert_eq!(src.mode(), PadMode::None);
        assert_eq!(sink.pull_range(0, 4).unwrap_err(), FlowError::Flushing);
    }

    #[test]
    fn test_pull_near_end_of_offset_space() {
        let src = Pad::builder("src", PadDirection::Src)
            .getrange_function(|_, _, size| Ok(Buffer::from_vec(vec![1; size])))
            .build();
        let sink = Pad::builder("sink", PadDirection::Sink).build();
        src.link(&sink).unwrap();
        sink.activate_mode(PadMode::Pull, true).unwrap();

        let last = sink.pull_range(u64::MAX - 1, 4).unwrap();
        assert_eq!(last.len(), 4);
        let again = sink.pull_range(u64::MAX - 1, 4).unwrap();
        assert!(again.flags().contains(BufferFlags::DISCONT));
    }

    #[test]
    fn test_flush_start_overtakes_pending_sticky_events() {
        let src = Pad::builder("src", PadDirection::Src).build();
        src.set_active(true).unwrap();
        assert!(src.push_event(Event::StreamStart(StreamStartEvent::new("s"))));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            Pad::builder("sink", PadDirection::Sink)
                .event_function(move |pad, event| {
                    seen.lock().unwrap().push(event.name().to_string());
                    pad.event_default(event)
                })
                .build()
        };
        src.link(&sink).unwrap();
        sink.set_active(true).unwrap();

        assert!(src.push_event(Event::FlushStart));
        assert_eq!(seen.lock().unwrap().as_slice(), ["flush-start"]);
        assert!(sink.sticky_events().is_empty());

        assert!(src.push_event(Event::FlushStop(Default::default())));
        assert_eq!(seen.lock().unwrap().as_slice(), ["flush-start", "flush-stop"]);

        assert!(src.push_event(Event::Eos));
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["flush-start", "flush-stop", "stream-start", "eos"]
        );
    }

    #[test]
    fn test_pull_without_getrange_cannot_activate() {
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = Pad::builder("sink", PadDirection::Sink).build();
        src.link(&sink).unwrap();
        assert!(matches!(
            sink.activate_mode(PadMode::Pull, true),
            Err(Error::Activation { .. })
        ));
        assert_eq!(sink.mode(), PadMode::None);
    }

    #[test]
    fn test_chain_in_pull_mode_is_wrong_state() {
        let chained = Arc::new(AtomicUsize::new(0));
        let src = Pad::builder("src", PadDirection::Src)
            .getrange_function(|_, _, size| Ok(Buffer::from_vec(vec![0; size])))
            .build();
        let sink = counting_sink(Arc::clone(&chained));
        src.link(&sink).unwrap();
        sink.activate_mode(PadMode::Pull, true).unwrap();

        assert_eq!(sink.chain(Buffer::from_slice(b"a")), Err(FlowError::Flushing));
        assert_eq!(src.push(Buffer::from_slice(b"a")), Err(FlowError::Flushing));
        assert_eq!(chained.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_default_event_forwarding_uses_internal_links() {
        let out_count = Arc::new(AtomicUsize::new(0));
        let element_src = Pad::builder("src", PadDirection::Src).build();
        let element_sink = Pad::builder("sink", PadDirection::Sink).build();
        element_sink.set_internal_links(&[element_src.clone()]);

        let downstream = counting_sink(Arc::clone(&out_count));
        element_src.link(&downstream).unwrap();
        for pad in [&downstream, &element_src, &element_sink] {
            pad.set_active(true).unwrap();
        }

        assert!(element_sink.send_event(Event::Caps(caps("x/y"))));
        assert_eq!(element_src.caps(), Some(caps("x/y")));
        assert_eq!(downstream.caps(), Some(caps("x/y")));
    }

    #[test]
    fn test_queries() {
        let src = Pad::builder_from_template(
            &PadTemplate::src(caps("x/y, rate=[1, 100]")),
            "src",
        )
        .build();
        let sink = Pad::builder_from_template(&PadTemplate::sink(caps("x/y, rate=50")), "sink")
            .build();

        assert_eq!(src.peer_query_caps(None), Caps::new_any());
        src.link(&sink).unwrap();
        assert_eq!(src.peer_query_caps(None), caps("x/y, rate=50"));
        assert!(sink.query_accept_caps(&caps("x/y, rate=50")));
        assert!(!sink.query_accept_caps(&caps("x/y, rate=[1, 50]")));

        let mut duration = Query::new_duration(crate::event::Format::Bytes);
        assert!(!sink.peer_query(&mut duration));
    }

    #[test]
    fn test_negotiate_pushes_fixed_caps() {
        let src = Pad::builder_from_template(
            &PadTemplate::src(caps("video/x-raw, format=A, width=[1, 100]")),
            "src",
        )
        .build();
        let sink = Pad::builder_from_template(
            &PadTemplate::sink(caps("video/x-raw, format=A, width=50")),
            "sink",
        )
        .build();
        src.link(&sink).unwrap();
        sink.set_active(true).unwrap();
        src.set_active(true).unwrap();

        let negotiated = src.negotiate().unwrap();
        assert_eq!(negotiated, caps("video/x-raw, format=A, width=50"));
        assert_eq!(src.caps(), Some(negotiated.clone()));
        assert_eq!(sink.caps(), Some(negotiated));
    }

    #[test]
    fn test_reconfigure_flag() {
        let (src, sink) = active_pair(Arc::new(AtomicUsize::new(0)));
        assert!(!src.check_reconfigure());
        assert!(sink.push_event(Event::Reconfigure));
        assert!(src.check_reconfigure());
        assert!(!src.check_reconfigure());
    }

    #[test]
    fn test_wrong_direction_events_are_refused() {
        let (src, sink) = active_pair(Arc::new(AtomicUsize::new(0)));
        assert!(!src.push_event(Event::Reconfigure));
        assert!(!sink.push_event(Event::Eos));
        assert!(!src.send_event(Event::Eos));
    }
}
