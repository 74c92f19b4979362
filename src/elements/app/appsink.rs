//! AppSink: hands buffers and events to application code.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{
    Element, ElementImpl, Pad, PadTemplate, StateChange, StateChangeError, StateChangeSuccess,
};
use crate::event::Event;
use crate::flow::{FlowResult, FlowSuccess};
use crate::observability::trace_eos;
use crate::pipeline::Message;
use crate::sync::{lock, wait_timeout};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

struct SinkState {
    buffers: Vec<Buffer>,
    events: Vec<Event>,
    eos: bool,
    chain_return: FlowResult,
    async_preroll: bool,
    /// READY->PAUSED returned ASYNC and no data arrived yet.
    preroll_pending: bool,
}

struct AppSinkShared {
    state: Mutex<SinkState>,
    cond: Condvar,
}

impl AppSinkShared {
    /// Complete a pending preroll; call without the state lock.
    fn preroll(&self, pad: &Pad) {
        let pending = std::mem::take(&mut lock(&self.state).preroll_pending);
        if !pending {
            return;
        }
        if let Some(element) = pad.parent_element() {
            debug!(element = %element.name(), "prerolled");
            if let Err(e) = element.continue_state(Ok(StateChangeSuccess::Success)) {
                debug!(element = %element.name(), error = %e, "continuing after preroll failed");
            }
        }
    }

    fn chain(&self, pad: &Pad, buffer: Buffer) -> FlowResult {
        let result = {
            let mut state = lock(&self.state);
            state.buffers.push(buffer);
            self.cond.notify_all();
            state.chain_return
        };
        self.preroll(pad);
        result
    }

    fn event(&self, pad: &Pad, event: Event) -> bool {
        let eos = matches!(event, Event::Eos);
        {
            let mut state = lock(&self.state);
            match &event {
                Event::Eos => state.eos = true,
                Event::FlushStop(_) => state.eos = false,
                _ => {}
            }
            state.events.push(event);
            self.cond.notify_all();
        }
        if eos {
            self.preroll(pad);
            if let Some(element) = pad.parent_element() {
                trace_eos(element.name());
                element.post_message(Message::eos(element.name()));
            }
        }
        true
    }
}

struct AppSinkImpl {
    shared: Arc<AppSinkShared>,
}

impl ElementImpl for AppSinkImpl {
    fn change_state(
        &self,
        element: &Element,
        transition: StateChange,
    ) -> Result<StateChangeSuccess, StateChangeError> {
        if transition == StateChange::ReadyToPaused {
            let mut state = lock(&self.shared.state);
            state.eos = false;
            state.preroll_pending = state.async_preroll;
        }
        let ret = element.parent_change_state(transition)?;
        match transition {
            StateChange::ReadyToPaused => {
                let mut state = lock(&self.shared.state);
                // Data may already have arrived while the pads activated.
                if state.preroll_pending && state.buffers.is_empty() && !state.eos {
                    return Ok(StateChangeSuccess::Async);
                }
                state.preroll_pending = false;
            }
            StateChange::PausedToReady => {
                lock(&self.shared.state).preroll_pending = false;
            }
            _ => {}
        }
        Ok(ret)
    }
}

/// A sink recording everything it receives.
///
/// Every buffer is recorded and answered with the configured chain
/// return. Every event is recorded; EOS additionally posts an EOS message.
/// With async preroll enabled, READY->PAUSED completes asynchronously
/// when the first buffer (or EOS) arrives.
pub struct AppSink {
    element: Element,
    shared: Arc<AppSinkShared>,
}

impl AppSink {
    /// Create a sink accepting any caps.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_caps(name, Caps::new_any())
    }

    /// Create a sink whose pad template accepts `caps`.
    pub fn with_caps(name: impl Into<String>, caps: Caps) -> Self {
        let shared = Arc::new(AppSinkShared {
            state: Mutex::new(SinkState {
                buffers: Vec::new(),
                events: Vec::new(),
                eos: false,
                chain_return: Ok(FlowSuccess::Ok),
                async_preroll: false,
                preroll_pending: false,
            }),
            cond: Condvar::new(),
        });
        let chain_shared = Arc::clone(&shared);
        let event_shared = Arc::clone(&shared);
        let pad = Pad::builder_from_template(&PadTemplate::sink(caps), "sink")
            .chain_function(move |pad, buffer| chain_shared.chain(pad, buffer))
            .event_function(move |pad, event| event_shared.event(pad, event))
            .build();

        let element = Element::new(
            name,
            AppSinkImpl {
                shared: Arc::clone(&shared),
            },
        );
        if let Err(e) = element.add_pad(&pad) {
            tracing::error!(error = %e, "appsink pad setup failed");
        }
        Self { element, shared }
    }

    /// Complete READY->PAUSED asynchronously on the first buffer.
    pub fn with_async_preroll(self, async_preroll: bool) -> Self {
        lock(&self.shared.state).async_preroll = async_preroll;
        self
    }

    /// The element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// The sink pad.
    pub fn pad(&self) -> Option<Pad> {
        self.element.pad("sink")
    }

    /// Return `result` from the chain function from now on.
    pub fn set_chain_return(&self, result: FlowResult) {
        lock(&self.shared.state).chain_return = result;
    }

    /// Buffers received so far.
    pub fn buffers(&self) -> Vec<Buffer> {
        lock(&self.shared.state).buffers.clone()
    }

    /// Take the buffers received so far.
    pub fn take_buffers(&self) -> Vec<Buffer> {
        std::mem::take(&mut lock(&self.shared.state).buffers)
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<Event> {
        lock(&self.shared.state).events.clone()
    }

    /// Names of the events received so far.
    pub fn event_names(&self) -> Vec<String> {
        lock(&self.shared.state)
            .events
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Check if EOS was received since the last flush.
    pub fn is_eos(&self) -> bool {
        lock(&self.shared.state).eos
    }

    /// Wait until at least `count` buffers were received.
    pub fn wait_for_buffers(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.buffers.len() >= count)
    }

    /// Wait until EOS is received.
    pub fn wait_for_eos(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |s| s.eos)
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(&SinkState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.shared.state);
        while !done(&state) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = wait_timeout(&self.shared.cond, state, remaining).0;
        }
        true
    }
}
