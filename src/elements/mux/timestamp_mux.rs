//! TimestampMux: interleaves any number of inputs by presentation time.
//!
//! Built on [`CollectPads`]: once every waiting input holds a buffer, the
//! one with the lowest PTS is pushed out. Inputs are request pads named
//! `sink_%u`. The first stream-start, caps and segment seen on any input
//! become the output's; later caps must intersect the output caps.

use crate::caps::Caps;
use crate::element::{
    CollectPads, Element, ElementImpl, Pad, PadDirection, PadPresence, PadTemplate, State,
    StateChange, StateChangeError, StateChangeSuccess,
};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::flow::FlowSuccess;
use crate::sync::lock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct OutputState {
    stream_start_sent: bool,
    caps: Option<Caps>,
    segment_sent: bool,
}

struct MuxShared {
    collect: CollectPads,
    src: Pad,
    output: Mutex<OutputState>,
}

impl MuxShared {
    fn sink_event(&self, pad: &Pad, event: Event) -> bool {
        match event {
            Event::StreamStart(_) => {
                let first = !std::mem::replace(&mut lock(&self.output).stream_start_sent, true);
                !first || self.src.push_event(event)
            }
            Event::Caps(caps) => {
                let current = lock(&self.output).caps.clone();
                match current {
                    None => {
                        if !self.src.push_event(Event::Caps(caps.clone())) {
                            return false;
                        }
                        lock(&self.output).caps = Some(caps);
                        true
                    }
                    Some(current) => {
                        let compatible = current.can_intersect(&caps);
                        if !compatible {
                            warn!(pad = %pad.name(), %caps, output = %current, "incompatible input caps");
                        }
                        compatible
                    }
                }
            }
            Event::Segment(_) => {
                let first = !std::mem::replace(&mut lock(&self.output).segment_sent, true);
                !first || self.src.push_event(event)
            }
            Event::FlushStart => self.src.push_event(event),
            Event::FlushStop(_) => {
                lock(&self.output).segment_sent = false;
                self.src.push_event(event)
            }
            // EOS goes out once all inputs ended.
            Event::Eos => true,
            event => self.src.push_event(event),
        }
    }

    fn reset(&self) {
        *lock(&self.output) = OutputState::default();
    }
}

struct MuxImpl {
    shared: Arc<MuxShared>,
}

impl ElementImpl for MuxImpl {
    fn change_state(
        &self,
        element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        if transition == StateChange::ReadyToPaused {
            self.shared.reset();
            self.shared.collect.start();
        }
        let ret = element.parent_change_state(transition);
        if transition == StateChange::PausedToReady {
            self.shared.collect.stop();
        }
        ret
    }
}

/// An N-to-1 element ordering buffers by timestamp.
///
/// ```rust
/// use padflow::elements::TimestampMux;
///
/// let mux = TimestampMux::new("mux");
/// let video = mux.request_pad().unwrap();
/// let audio = mux.request_pad().unwrap();
/// assert_eq!((video.name(), audio.name()), ("sink_0", "sink_1"));
/// ```
pub struct TimestampMux {
    element: Element,
    shared: Arc<MuxShared>,
    template: PadTemplate,
    next_id: AtomicU32,
}

impl TimestampMux {
    /// Create a mux without inputs.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let collect = CollectPads::new(name.clone());
        let src = Pad::builder_from_template(&PadTemplate::src(Caps::new_any()), "src").build();
        let shared = Arc::new(MuxShared {
            collect: collect.clone(),
            src: src.clone(),
            output: Mutex::new(OutputState::default()),
        });

        {
            let src = src.clone();
            collect.set_buffer_function(move |_, item| match item {
                Some((_, buffer)) => src.push(buffer),
                None => {
                    debug!(pad = %src.name(), "all inputs finished");
                    src.push_event(Event::Eos);
                    Ok(FlowSuccess::Ok)
                }
            });
        }
        {
            let shared_weak = Arc::downgrade(&shared);
            collect.set_event_function(move |_, pad, event| match shared_weak.upgrade() {
                Some(shared) => shared.sink_event(pad, event),
                None => false,
            });
        }

        let element = Element::new(
            name,
            MuxImpl {
                shared: Arc::clone(&shared),
            },
        );
        if let Err(e) = element.add_pad(&src) {
            tracing::error!(error = %e, "mux pad setup failed");
        }
        Self {
            element,
            shared,
            template: PadTemplate::new(
                "sink_%u",
                PadDirection::Sink,
                PadPresence::Request,
                Caps::new_any(),
            ),
            next_id: AtomicU32::new(0),
        }
    }

    /// The element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// The output pad.
    pub fn src_pad(&self) -> &Pad {
        &self.shared.src
    }

    /// The aggregation helper, e.g. to exclude a sparse input from
    /// waiting.
    pub fn collect_pads(&self) -> &CollectPads {
        &self.shared.collect
    }

    /// Create a new input. Active right away when the element is PAUSED or
    /// higher.
    pub fn request_pad(&self) -> Result<Pad> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("sink_{id}");
        let pad = self.shared.collect.new_sink_pad(&self.template, name);
        if let Err(e) = self.element.add_pad(&pad) {
            self.shared.collect.remove_pad(&pad);
            return Err(e);
        }
        if self.element.current_state() >= State::Paused {
            pad.set_active(true)?;
        }
        self.update_links();
        debug!(element = %self.element.name(), pad = %pad.name(), "requested input");
        Ok(pad)
    }

    /// Remove an input obtained from [`request_pad`](Self::request_pad).
    pub fn release_pad(&self, pad: &Pad) -> Result<()> {
        if !self.shared.collect.remove_pad(pad) {
            return Err(Error::Element(format!(
                "{} is not an input of {}",
                pad.name(),
                self.element.name()
            )));
        }
        self.element.remove_pad(pad);
        self.update_links();
        Ok(())
    }

    /// Upstream events on the output reach every input.
    fn update_links(&self) {
        self.shared.src.set_internal_links(&self.shared.collect.pads());
    }
}
