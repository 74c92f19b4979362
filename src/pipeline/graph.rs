//! The pipeline container.

use super::bus::{Bus, BusConfig, Message, MessageKind};
use crate::caps::Caps;
use crate::clock::{ClockTime, SystemClock};
use crate::element::{
    Element, ElementImpl, Pad, State, StateChange, StateChangeError, StateChangeSuccess,
};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::observability::{TracingConfig, instrument_element, instrument_pipeline};
use crate::sync::lock;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Default)]
struct AsyncTracking {
    /// Children whose async transition has not completed.
    pending: HashSet<String>,
    /// Children that posted async-done before their async return was seen.
    done_early: HashSet<String>,
    /// The pipeline itself returned `Async` and waits for `pending`.
    waiting: bool,
}

#[derive(Default)]
struct EosTracking {
    received: HashSet<String>,
    posted: bool,
}

struct PipelineShared {
    children: Mutex<Vec<Element>>,
    async_state: Mutex<AsyncTracking>,
    eos: Mutex<EosTracking>,
    clock: SystemClock,
    base_time: Mutex<Option<ClockTime>>,
    tracing: TracingConfig,
}

impl PipelineShared {
    fn children(&self) -> Vec<Element> {
        lock(&self.children).clone()
    }

    /// Children ordered from sources to sinks along pad links. Elements in
    /// a cycle keep insertion order at the end.
    fn sorted_children(&self) -> Vec<Element> {
        let children = self.children();
        let upstream_of = |element: &Element| -> Vec<usize> {
            element
                .sink_pads()
                .iter()
                .filter_map(Pad::peer)
                .filter_map(|peer| peer.parent_element())
                .filter_map(|parent| children.iter().position(|c| *c == parent))
                .collect()
        };
        let deps: Vec<Vec<usize>> = children.iter().map(upstream_of).collect();

        let mut placed = vec![false; children.len()];
        let mut order = Vec::with_capacity(children.len());
        loop {
            let next = (0..children.len())
                .find(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d] || d == i));
            match next {
                Some(i) => {
                    placed[i] = true;
                    order.push(children[i].clone());
                }
                None => break,
            }
        }
        for (i, child) in children.iter().enumerate() {
            if !placed[i] {
                order.push(child.clone());
            }
        }
        order
    }

    fn sink_names(&self) -> HashSet<String> {
        self.children()
            .iter()
            .filter(|c| c.src_pads().is_empty())
            .map(|c| c.name().to_string())
            .collect()
    }

    fn reset_eos(&self) {
        *lock(&self.eos) = EosTracking::default();
    }
}

struct PipelineImpl {
    shared: Arc<PipelineShared>,
}

impl PipelineImpl {
    fn change_children(
        &self,
        element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        // Sinks first in both directions: on the way up they are ready
        // before sources push, on the way down they flush first and unblock
        // upstream streaming threads.
        let mut children = self.shared.sorted_children();
        children.reverse();

        {
            let mut tracking = lock(&self.shared.async_state);
            tracking.done_early.clear();
            if !transition.is_upward() {
                tracking.pending.clear();
                tracking.waiting = false;
            }
        }

        let mut no_preroll = false;
        for child in &children {
            let _span = instrument_element(&self.shared.tracing, element.name(), child.name());
            match child.set_state(transition.next()) {
                Ok(StateChangeSuccess::Success) => {}
                Ok(StateChangeSuccess::NoPreroll) => no_preroll = true,
                Ok(StateChangeSuccess::Async) => {
                    let mut tracking = lock(&self.shared.async_state);
                    if !tracking.done_early.remove(child.name()) {
                        tracking.pending.insert(child.name().to_string());
                    }
                }
                Err(e) => {
                    error!(pipeline = %element.name(), child = %child.name(), error = %e, "child state change failed");
                    element.post_message(Message::error(
                        child.name(),
                        format!("state change {transition} failed"),
                        Some(e.to_string()),
                    ));
                    return Err(StateChangeError);
                }
            }
        }

        if no_preroll {
            return Ok(StateChangeSuccess::NoPreroll);
        }
        let mut tracking = lock(&self.shared.async_state);
        if tracking.pending.is_empty() {
            Ok(StateChangeSuccess::Success)
        } else {
            debug!(pipeline = %element.name(), waiting_for = ?tracking.pending, "pipeline state change is async");
            tracking.waiting = true;
            Ok(StateChangeSuccess::Async)
        }
    }

    fn child_async_done(&self, element: &Element, child: &str) {
        let complete = {
            let mut tracking = lock(&self.shared.async_state);
            if tracking.pending.remove(child) {
                if tracking.pending.is_empty() && tracking.waiting {
                    tracking.waiting = false;
                    true
                } else {
                    false
                }
            } else {
                tracking.done_early.insert(child.to_string());
                false
            }
        };
        if complete {
            debug!(pipeline = %element.name(), "all children completed async state change");
            if let Err(e) = element.continue_state(Ok(StateChangeSuccess::Success)) {
                error!(pipeline = %element.name(), error = %e, "continuing state change failed");
            }
        }
    }

    fn child_eos(&self, element: &Element, child: &str) {
        let sinks = self.shared.sink_names();
        if !sinks.contains(child) {
            return;
        }
        let post = {
            let mut eos = lock(&self.shared.eos);
            eos.received.insert(child.to_string());
            if !eos.posted && sinks.iter().all(|s| eos.received.contains(s)) {
                eos.posted = true;
                true
            } else {
                false
            }
        };
        if post {
            debug!(pipeline = %element.name(), "all sinks reached EOS");
            element.post_message(Message::eos(element.name()));
        }
    }
}

impl ElementImpl for PipelineImpl {
    fn change_state(
        &self,
        element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        let _span = instrument_pipeline(&self.shared.tracing, element.name());
        match transition {
            StateChange::ReadyToPaused | StateChange::PausedToReady => self.shared.reset_eos(),
            StateChange::PausedToPlaying => {
                let now = self.shared.clock.time();
                *lock(&self.shared.base_time) = Some(now);
                debug!(pipeline = %element.name(), base_time = %now, "clock running");
            }
            _ => {}
        }
        let ret = self.change_children(element, transition)?;
        element.parent_change_state(transition)?;
        Ok(ret)
    }

    fn send_event(&self, element: &Element, event: Event) -> bool {
        let flush_seek = matches!(&event, Event::Seek(seek) if seek.flags.contains(crate::event::SeekFlags::FLUSH));
        let children = self.shared.children();
        let targets: Vec<&Element> = if event.is_upstream() {
            children.iter().filter(|c| c.src_pads().is_empty()).collect()
        } else {
            children.iter().filter(|c| c.sink_pads().is_empty()).collect()
        };
        if targets.is_empty() {
            return false;
        }
        if flush_seek {
            self.shared.reset_eos();
        }
        let mut handled = true;
        for target in targets {
            debug!(pipeline = %element.name(), target = %target.name(), event = %event.name(), "sending event");
            handled &= target.send_event(event.clone());
        }
        handled
    }

    fn handle_message(&self, element: &Element, message: Message) {
        match message.kind() {
            MessageKind::AsyncDone => self.child_async_done(element, message.source()),
            MessageKind::Eos => self.child_eos(element, message.source()),
            _ => {
                element.post_message(message);
            }
        }
    }
}

/// A top-level container of elements with its own bus and clock.
///
/// State changes reach children sink-first, in both directions. The
/// aggregated result reports `NoPreroll` if any child did, else `Async`
/// while any child is still completing, else `Success`.
/// A failing child stops the change and an error message is posted.
///
/// Set the pipeline to NULL before dropping it; streaming threads of
/// children keep running otherwise.
///
/// ```rust
/// use padflow::pipeline::Pipeline;
/// use padflow::element::State;
///
/// let pipeline = Pipeline::new("empty");
/// pipeline.set_state(State::Playing).unwrap();
/// assert_eq!(pipeline.current_state(), State::Playing);
/// pipeline.set_state(State::Null).unwrap();
/// ```
#[derive(Clone)]
pub struct Pipeline {
    element: Element,
    bus: Bus,
    shared: Arc<PipelineShared>,
}

impl Pipeline {
    /// Create an empty pipeline with an unbounded bus.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, BusConfig::default(), TracingConfig::default())
    }

    /// Create an empty pipeline with explicit bus and tracing configuration.
    pub fn with_config(name: impl Into<String>, bus: BusConfig, tracing: TracingConfig) -> Self {
        let shared = Arc::new(PipelineShared {
            children: Mutex::new(Vec::new()),
            async_state: Mutex::new(AsyncTracking::default()),
            eos: Mutex::new(EosTracking::default()),
            clock: SystemClock::new(),
            base_time: Mutex::new(None),
            tracing,
        });
        let element = Element::new(
            name,
            PipelineImpl {
                shared: Arc::clone(&shared),
            },
        );
        let bus = Bus::new(bus);
        element.set_bus(Some(bus.clone()));
        Self {
            element,
            bus,
            shared,
        }
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        self.element.name()
    }

    /// The pipeline as an element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// The pipeline bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    // ------------------------------------------------------------------------
    // Children
    // ------------------------------------------------------------------------

    /// Add a child. Names are unique within the pipeline.
    pub fn add(&self, element: &Element) -> Result<()> {
        if element.parent().is_some() {
            return Err(Error::Element(format!(
                "{} already has a parent",
                element.name()
            )));
        }
        let mut children = lock(&self.shared.children);
        if children.iter().any(|c| c.name() == element.name()) {
            return Err(Error::Element(format!(
                "pipeline {} already contains {}",
                self.name(),
                element.name()
            )));
        }
        element.set_parent(Some(&self.element));
        children.push(element.clone());
        debug!(pipeline = %self.name(), element = %element.name(), "added element");
        Ok(())
    }

    /// Add several children.
    pub fn add_many(&self, elements: &[&Element]) -> Result<()> {
        for element in elements {
            self.add(element)?;
        }
        Ok(())
    }

    /// Remove a child. It keeps its state and links.
    pub fn remove(&self, element: &Element) -> bool {
        let mut children = lock(&self.shared.children);
        let before = children.len();
        children.retain(|c| c != element);
        let removed = children.len() != before;
        if removed {
            element.set_parent(None);
        }
        removed
    }

    /// Children in insertion order.
    pub fn children(&self) -> Vec<Element> {
        self.shared.children()
    }

    /// Child by name.
    pub fn child(&self, name: &str) -> Option<Element> {
        lock(&self.shared.children)
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Children without sink pads.
    pub fn sources(&self) -> Vec<Element> {
        self.children()
            .into_iter()
            .filter(|c| c.sink_pads().is_empty())
            .collect()
    }

    /// Children without source pads.
    pub fn sinks(&self) -> Vec<Element> {
        self.children()
            .into_iter()
            .filter(|c| c.src_pads().is_empty())
            .collect()
    }

    /// Link the first unlinked source pad of `src` to the first unlinked
    /// sink pad of `sink`.
    pub fn link(&self, src: &Element, sink: &Element) -> Result<()> {
        self.link_filtered(src, sink, None)
    }

    /// Like [`link`](Self::link), restricting the formats on the link.
    pub fn link_filtered(&self, src: &Element, sink: &Element, filter: Option<&Caps>) -> Result<()> {
        let src_pad = src
            .src_pads()
            .into_iter()
            .find(|p| !p.is_linked())
            .ok_or_else(|| Error::Element(format!("{} has no free source pad", src.name())))?;
        let sink_pad = sink
            .sink_pads()
            .into_iter()
            .find(|p| !p.is_linked())
            .ok_or_else(|| Error::Element(format!("{} has no free sink pad", sink.name())))?;
        src_pad.link_filtered(&sink_pad, filter)?;
        Ok(())
    }

    /// Link named pads.
    pub fn link_pads(&self, src: &Element, src_pad: &str, sink: &Element, sink_pad: &str) -> Result<()> {
        let src_pad = src
            .pad(src_pad)
            .ok_or_else(|| Error::Element(format!("{} has no pad {src_pad}", src.name())))?;
        let sink_pad = sink
            .pad(sink_pad)
            .ok_or_else(|| Error::Element(format!("{} has no pad {sink_pad}", sink.name())))?;
        src_pad.link(&sink_pad)?;
        Ok(())
    }

    /// Link a chain of elements pairwise.
    pub fn link_many(&self, elements: &[&Element]) -> Result<()> {
        for pair in elements.windows(2) {
            self.link(pair[0], pair[1])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // State, events, clock
    // ------------------------------------------------------------------------

    /// Change state; see [`Element::set_state`].
    pub fn set_state(&self, state: State) -> Result<StateChangeSuccess> {
        self.element.set_state(state)
    }

    /// Wait for a pending asynchronous state change; see [`Element::state`].
    pub fn state(
        &self,
        timeout: Option<Duration>,
    ) -> (
        std::result::Result<StateChangeSuccess, StateChangeError>,
        State,
        Option<State>,
    ) {
        self.element.state(timeout)
    }

    /// Current state.
    pub fn current_state(&self) -> State {
        self.element.current_state()
    }

    /// Send an event: upstream events go to the sink elements, downstream
    /// events to the source elements.
    pub fn send_event(&self, event: Event) -> bool {
        self.element.send_event(event)
    }

    /// Pipeline clock.
    pub fn clock(&self) -> SystemClock {
        self.shared.clock
    }

    /// Clock time at which the pipeline last went to PLAYING.
    pub fn base_time(&self) -> Option<ClockTime> {
        *lock(&self.shared.base_time)
    }

    /// Time elapsed since the pipeline last went to PLAYING.
    pub fn running_time(&self) -> Option<ClockTime> {
        self.base_time()
            .map(|base| self.shared.clock.time().saturating_sub(base))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name())
            .field("children", &lock(&self.shared.children).len())
            .field("state", &self.current_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{DefaultElementImpl, PadDirection};
    use crate::flow::FlowSuccess;

    fn element_with(name: &str, src: bool, sink: bool) -> Element {
        let element = Element::new(name, DefaultElementImpl);
        if sink {
            let pad = Pad::builder("sink", PadDirection::Sink)
                .chain_function(|_, _| Ok(FlowSuccess::Ok))
                .build();
            element.add_pad(&pad).unwrap();
        }
        if src {
            element
                .add_pad(&Pad::builder("src", PadDirection::Src).build())
                .unwrap();
        }
        element
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let pipeline = Pipeline::new("p");
        let a = element_with("a", true, false);
        pipeline.add(&a).unwrap();
        assert!(pipeline.add(&a).is_err());
        assert!(pipeline.add(&element_with("a", true, false)).is_err());
        assert_eq!(a.parent().unwrap(), *pipeline.element());
        assert!(pipeline.remove(&a));
        assert!(a.parent().is_none());
    }

    #[test]
    fn test_sorted_children_follow_links() {
        let pipeline = Pipeline::new("p");
        let sink = element_with("sink", false, true);
        let mid = element_with("mid", true, true);
        let src = element_with("src", true, false);
        pipeline.add_many(&[&sink, &mid, &src]).unwrap();
        pipeline.link_many(&[&src, &mid, &sink]).unwrap();

        let names: Vec<String> = pipeline
            .shared
            .sorted_children()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, ["src", "mid", "sink"]);
        assert_eq!(pipeline.sources()[0].name(), "src");
        assert_eq!(pipeline.sinks()[0].name(), "sink");
    }

    #[test]
    fn test_eos_aggregated_over_sinks() {
        let pipeline = Pipeline::new("p");
        let a = element_with("a", false, true);
        let b = element_with("b", false, true);
        pipeline.add_many(&[&a, &b]).unwrap();

        a.post_message(Message::eos("a"));
        assert!(pipeline.bus().pop().is_none());
        b.post_message(Message::eos("b"));
        let msg = pipeline.bus().pop().unwrap();
        assert!(msg.is_eos());
        assert_eq!(msg.source(), "p");
        b.post_message(Message::eos("b"));
        assert!(pipeline.bus().pop().is_none());
    }

    #[test]
    fn test_running_time_after_play() {
        let pipeline = Pipeline::new("p");
        assert!(pipeline.running_time().is_none());
        pipeline.set_state(State::Playing).unwrap();
        assert!(pipeline.base_time().is_some());
        assert!(pipeline.running_time().is_some());
        pipeline.set_state(State::Null).unwrap();
    }
}
