//! The element handle: pads, state machine and message posting.

use super::pad::{Pad, PadDirection};
use super::state::{State, StateChange, StateChangeError, StateChangeSuccess};
use super::traits::ElementImpl;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::observability::trace_state_change;
use crate::pipeline::{Bus, Message, MessageKind};
use crate::sync::{lock, wait, wait_timeout};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

type StateReturn = std::result::Result<StateChangeSuccess, StateChangeError>;

struct StateData {
    current: State,
    /// State the in-flight transition leads to.
    pending: Option<State>,
    target: State,
    last_return: StateReturn,
    /// A `set_state` loop is running and will observe commits.
    busy: bool,
}

struct ElementInner {
    name: String,
    imp: Box<dyn ElementImpl>,
    pads: Mutex<Vec<Pad>>,
    state: Mutex<StateData>,
    state_cond: Condvar,
    /// Serialises `set_state` callers.
    state_lock: Mutex<()>,
    bus: Mutex<Option<Bus>>,
    parent: Mutex<Option<WeakElement>>,
}

/// A processing element. Cloning yields another handle to the same
/// element.
#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
}

/// Non-owning element handle, for pad hooks and task closures that must
/// not keep their element alive.
#[derive(Clone)]
pub struct WeakElement(Weak<ElementInner>);

impl WeakElement {
    /// Get a strong handle if the element still exists.
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(|inner| Element { inner })
    }
}

impl fmt::Debug for WeakElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakElement")
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Element {}

impl Element {
    /// Create an element in the NULL state.
    pub fn new(name: impl Into<String>, imp: impl ElementImpl) -> Self {
        Self {
            inner: Arc::new(ElementInner {
                name: name.into(),
                imp: Box::new(imp),
                pads: Mutex::new(Vec::new()),
                state: Mutex::new(StateData {
                    current: State::Null,
                    pending: None,
                    target: State::Null,
                    last_return: Ok(StateChangeSuccess::Success),
                    busy: false,
                }),
                state_cond: Condvar::new(),
                state_lock: Mutex::new(()),
                bus: Mutex::new(None),
                parent: Mutex::new(None),
            }),
        }
    }

    /// Element name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Arc::downgrade(&self.inner))
    }

    // ------------------------------------------------------------------------
    // Pads
    // ------------------------------------------------------------------------

    /// Add a pad. Pad names are unique per element and a pad belongs to at
    /// most one element.
    pub fn add_pad(&self, pad: &Pad) -> Result<()> {
        let mut pads = lock(&self.inner.pads);
        if pads.iter().any(|p| p.name() == pad.name()) {
            return Err(Error::Element(format!(
                "{} already has a pad named {}",
                self.name(),
                pad.name()
            )));
        }
        if !pad.set_parent(self.downgrade()) {
            return Err(Error::Element(format!(
                "pad {} already belongs to an element",
                pad.name()
            )));
        }
        pads.push(pad.clone());
        debug!(element = %self.name(), pad = %pad.name(), "added pad");
        Ok(())
    }

    /// Remove a pad, unlinking it first. Returns false if the pad is not
    /// one of ours.
    pub fn remove_pad(&self, pad: &Pad) -> bool {
        let removed = {
            let mut pads = lock(&self.inner.pads);
            let before = pads.len();
            pads.retain(|p| p != pad);
            pads.len() != before
        };
        if !removed {
            return false;
        }
        let _ = pad.set_active(false);
        if let Some(peer) = pad.peer() {
            let result = match pad.direction() {
                PadDirection::Src => pad.unlink(&peer),
                PadDirection::Sink => peer.unlink(pad),
            };
            if let Err(e) = result {
                warn!(element = %self.name(), pad = %pad.name(), error = %e, "unlink on removal failed");
            }
        }
        true
    }

    /// All pads in insertion order.
    pub fn pads(&self) -> Vec<Pad> {
        lock(&self.inner.pads).clone()
    }

    /// Pad by name.
    pub fn pad(&self, name: &str) -> Option<Pad> {
        lock(&self.inner.pads).iter().find(|p| p.name() == name).cloned()
    }

    /// Source pads.
    pub fn src_pads(&self) -> Vec<Pad> {
        lock(&self.inner.pads)
            .iter()
            .filter(|p| p.is_src())
            .cloned()
            .collect()
    }

    /// Sink pads.
    pub fn sink_pads(&self) -> Vec<Pad> {
        lock(&self.inner.pads)
            .iter()
            .filter(|p| p.is_sink())
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Hierarchy and messages
    // ------------------------------------------------------------------------

    /// Containing element, if any.
    pub fn parent(&self) -> Option<Element> {
        lock(&self.inner.parent).as_ref().and_then(WeakElement::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<&Element>) {
        *lock(&self.inner.parent) = parent.map(Element::downgrade);
    }

    /// Bus messages are posted to when there is no parent.
    pub fn bus(&self) -> Option<Bus> {
        lock(&self.inner.bus).clone()
    }

    /// Set the bus.
    pub fn set_bus(&self, bus: Option<Bus>) {
        *lock(&self.inner.bus) = bus;
    }

    /// Post a message: to the parent's message handler if there is a
    /// parent, else to the bus. Without either the message is dropped.
    pub fn post_message(&self, message: Message) -> bool {
        if let Some(parent) = self.parent() {
            parent.inner.imp.handle_message(&parent, message);
            return true;
        }
        match self.bus() {
            Some(bus) => bus.post(message),
            None => {
                trace!(element = %self.name(), %message, "no bus, dropping message");
                false
            }
        }
    }

    /// Post an error message for a fatal condition.
    pub fn post_error(&self, message: impl Into<String>, details: Option<String>) -> bool {
        let message = message.into();
        error!(element = %self.name(), %message, details = ?details, "posting error");
        self.post_message(Message::error(self.name(), message, details))
    }

    /// Post a warning message.
    pub fn post_warning(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        warn!(element = %self.name(), %message, "posting warning");
        self.post_message(Message::warning(self.name(), message))
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Send an event to the element through its behaviour.
    pub fn send_event(&self, event: Event) -> bool {
        self.inner.imp.send_event(self, event)
    }

    /// Default element event handling.
    ///
    /// Upstream events leave through a sink pad; a source element with no
    /// sink pads hands them to its own source pad's event function.
    /// Downstream events leave through every source pad; a sink element
    /// hands them to its own sink pads.
    pub fn default_send_event(&self, event: Event) -> bool {
        if event.is_upstream() {
            let sinks = self.sink_pads();
            if let Some(sink) = sinks.first() {
                return sink.push_event(event);
            }
            return self
                .src_pads()
                .first()
                .is_some_and(|src| src.send_event(event));
        }

        let srcs = self.src_pads();
        if srcs.is_empty() {
            let sinks = self.sink_pads();
            let mut handled = !sinks.is_empty();
            for sink in sinks {
                handled &= sink.send_event(event.clone());
            }
            return handled;
        }
        let mut handled = true;
        for src in srcs {
            handled &= src.push_event(event.clone());
        }
        handled
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Current state.
    pub fn current_state(&self) -> State {
        lock(&self.inner.state).current
    }

    /// State the in-flight transition leads to, if any.
    pub fn pending_state(&self) -> Option<State> {
        lock(&self.inner.state).pending
    }

    /// State requested by the last `set_state`.
    pub fn target_state(&self) -> State {
        lock(&self.inner.state).target
    }

    /// Default transition handling: READY->PAUSED activates source pads and
    /// then sink pads, PAUSED->READY deactivates them in the same order.
    ///
    /// Element behaviours call this from their own `change_state`.
    pub fn parent_change_state(&self, transition: StateChange) -> StateReturn {
        match transition {
            StateChange::ReadyToPaused => {
                for pad in self.src_pads().into_iter().chain(self.sink_pads()) {
                    if let Err(e) = pad.set_active(true) {
                        warn!(element = %self.name(), error = %e, "pad activation failed");
                        return Err(StateChangeError);
                    }
                }
            }
            StateChange::PausedToReady => {
                let mut failed = false;
                for pad in self.src_pads().into_iter().chain(self.sink_pads()) {
                    if let Err(e) = pad.set_active(false) {
                        warn!(element = %self.name(), error = %e, "pad deactivation failed");
                        failed = true;
                    }
                }
                if failed {
                    return Err(StateChangeError);
                }
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    /// Move to `target` through adjacent transitions.
    ///
    /// Returns `Async` if a transition completes later; the caller learns
    /// about completion through an async-done message or
    /// [`state`](Self::state). On failure the element stays in the last
    /// state it reached and may be set towards NULL again.
    ///
    /// # Panics
    ///
    /// Panics if the element behaviour returns `Async` for a downward
    /// transition.
    pub fn set_state(&self, target: State) -> Result<StateChangeSuccess> {
        let _serial = lock(&self.inner.state_lock);
        let mut result = StateChangeSuccess::Success;

        let mut state = lock(&self.inner.state);
        state.target = target;
        state.busy = true;

        loop {
            let from = match state.pending {
                Some(pending) if state.last_return == Ok(StateChangeSuccess::Async) => {
                    if pending <= target && state.current < target {
                        // Still working towards (or through) the target.
                        state.busy = false;
                        return Ok(StateChangeSuccess::Async);
                    }
                    // Going back down: continue from the pending state.
                    debug!(element = %self.name(), %pending, %target, "abandoning async transition");
                    state.last_return = Ok(StateChangeSuccess::Success);
                    pending
                }
                _ => state.current,
            };

            let Some(next) = from.next_toward(target) else {
                state.busy = false;
                return Ok(result);
            };
            let Some(transition) = StateChange::between(from, next) else {
                state.busy = false;
                return Err(Error::Element(format!("no transition {from} -> {next}")));
            };

            state.pending = Some(next);
            drop(state);

            trace!(element = %self.name(), %transition, "changing state");
            let ret = self.inner.imp.change_state(self, transition);

            state = lock(&self.inner.state);
            match ret {
                Ok(StateChangeSuccess::Async) => {
                    assert!(
                        transition.is_upward(),
                        "element {} returned ASYNC for downward transition {transition}",
                        self.name()
                    );
                    if state.pending.is_none() && state.current == next {
                        // continue_state already ran on another thread
                        // (or from inside change_state).
                        continue;
                    }
                    debug!(element = %self.name(), %transition, "state change is async");
                    state.last_return = Ok(StateChangeSuccess::Async);
                    state.busy = false;
                    return Ok(StateChangeSuccess::Async);
                }
                Ok(success) => {
                    if success == StateChangeSuccess::NoPreroll {
                        result = StateChangeSuccess::NoPreroll;
                    }
                    let old = state.current;
                    state.current = next;
                    state.pending = None;
                    state.last_return = Ok(success);
                    self.inner.state_cond.notify_all();
                    let pending = (next != target).then_some(target);
                    drop(state);
                    self.announce(old, next, pending);
                    state = lock(&self.inner.state);
                }
                Err(e) => {
                    state.pending = None;
                    state.last_return = Err(e);
                    state.busy = false;
                    let current = state.current;
                    self.inner.state_cond.notify_all();
                    drop(state);

                    if transition == StateChange::ReadyToPaused {
                        // Leave no pad half-activated.
                        for pad in self.pads() {
                            let _ = pad.set_active(false);
                        }
                    }
                    warn!(element = %self.name(), %transition, "state change failed");
                    return Err(Error::StateChange {
                        element: self.name().to_string(),
                        transition,
                        state: current,
                    });
                }
            }
        }
    }

    fn announce(&self, old: State, new: State, pending: Option<State>) {
        trace_state_change(self.name(), &old.to_string(), &new.to_string());
        self.post_message(Message::new(
            self.name(),
            MessageKind::StateChanged { old, new, pending },
        ));
    }

    /// Complete an asynchronous transition with `result`.
    ///
    /// On success the pending state is committed, an async-done message is
    /// posted and, unless a `set_state` call is still running, the element
    /// continues towards its target. Does nothing if no asynchronous
    /// transition is pending.
    pub fn continue_state(&self, result: StateReturn) -> Result<StateChangeSuccess> {
        let mut state = lock(&self.inner.state);
        let Some(next) = state.pending else {
            return Ok(StateChangeSuccess::Success);
        };
        // Only upward transitions complete asynchronously.
        if next <= state.current {
            return Ok(StateChangeSuccess::Success);
        }

        let old = state.current;
        if result.is_err() {
            state.pending = None;
            state.last_return = result;
            self.inner.state_cond.notify_all();
            drop(state);
            self.post_error(format!("async state change {old} -> {next} failed"), None);
            return Err(Error::StateChange {
                element: self.name().to_string(),
                transition: StateChange::between(old, next).unwrap_or(StateChange::ReadyToPaused),
                state: old,
            });
        }

        state.current = next;
        state.pending = None;
        state.last_return = result;
        self.inner.state_cond.notify_all();
        let target = state.target;
        let busy = state.busy;
        drop(state);

        debug!(element = %self.name(), %old, %next, "async state change completed");
        self.announce(old, next, (next != target).then_some(target));
        self.post_message(Message::new(self.name(), MessageKind::AsyncDone));

        if !busy && next != target {
            return self.set_state(target);
        }
        Ok(StateChangeSuccess::Success)
    }

    /// Abandon a pending asynchronous transition, leaving the element in
    /// its current state.
    pub fn abort_state(&self) {
        let mut state = lock(&self.inner.state);
        if state.pending.take().is_some() {
            debug!(element = %self.name(), current = %state.current, "aborting async state change");
            state.last_return = Err(StateChangeError);
            self.inner.state_cond.notify_all();
        }
    }

    /// Wait up to `timeout` (forever with `None`) for an asynchronous
    /// transition to complete.
    ///
    /// Returns the last transition result with the current and pending
    /// state. The result is `Async` if the wait timed out.
    pub fn state(&self, timeout: Option<Duration>) -> (StateReturn, State, Option<State>) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(&self.inner.state);
        while state.pending.is_some() && state.last_return == Ok(StateChangeSuccess::Async) {
            match deadline {
                None => state = wait(&self.inner.state_cond, state),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    let (guard, _) = wait_timeout(&self.inner.state_cond, state, remaining);
                    state = guard;
                }
            }
        }
        (state.last_return, state.current, state.pending)
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("Element")
            .field("name", &self.inner.name)
            .field("current", &state.current)
            .field("pending", &state.pending)
            .field("target", &state.target)
            .finish()
    }
}
