//! CollectPads: the synchronisation point of N-to-1 aggregators.
//!
//! Each input pad holds at most one queued buffer. Upstream threads queue
//! through the pad's chain function and block while their slot is taken.
//! Whenever every waiting, non-EOS input has a buffer, the helper calls
//! back on the thread that completed the set:
//!
//! - a **buffer function** receives the winning buffer (earliest by the
//!   comparator) and its pad;
//! - a **collected function** is handed the helper and peeks or pops per
//!   pad itself.
//!
//! When every input is EOS the callback runs once more with nothing
//! queued (`None` for the buffer function) so the aggregator can forward
//! EOS.
//!
//! ```text
//!  sink_0 ──chain──▶ [slot] ─┐
//!  sink_1 ──chain──▶ [slot] ─┼──▶ ready? ──▶ callback ──▶ src
//!  sink_2 ──chain──▶ [slot] ─┘
//! ```
//!
//! Lock order is callback lock, then stream lock. The stream lock is never
//! held while a callback runs; callbacks run one at a time.

use super::pad::{Pad, PadTemplate};
use crate::buffer::Buffer;
use crate::event::Event;
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::sync::{lock, wait};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use tracing::{debug, trace};

/// Called with the winning buffer and its pad, or `None` once all inputs
/// are EOS.
pub type BufferFunction = Box<dyn Fn(&CollectPads, Option<(Pad, Buffer)>) -> FlowResult + Send>;

/// Called when inputs are ready; pops buffers itself. Also called once
/// with nothing queued when all inputs are EOS.
pub type CollectedFunction = Box<dyn Fn(&CollectPads) -> FlowResult + Send>;

/// Orders two queued buffers; the smallest wins.
pub type CompareFunction = Box<dyn Fn(&Pad, &Buffer, &Pad, &Buffer) -> Ordering + Send>;

/// Transforms or drops (`None`) a buffer before it is queued.
pub type ClipFunction = Box<dyn Fn(&CollectPads, &Pad, Buffer) -> Option<Buffer> + Send + Sync>;

/// Handles events on input pads after the helper's own bookkeeping.
pub type CollectEventFunction = Box<dyn Fn(&CollectPads, &Pad, Event) -> bool + Send + Sync>;

enum Callback {
    None,
    Buffer(BufferFunction),
    Collected(CollectedFunction),
}

struct Callbacks {
    callback: Callback,
    compare: Option<CompareFunction>,
}

struct CollectData {
    pad: Pad,
    buffer: Option<Buffer>,
    eos: bool,
    flushing: bool,
    waiting: bool,
    locked: bool,
}

#[derive(Default)]
struct StreamState {
    pads: Vec<CollectData>,
    started: bool,
    eos_sent: bool,
    /// Error returned by a callback, reported to producers until a flush.
    last_error: Option<FlowError>,
    /// Bumped on every pop so the collected loop can tell it made progress.
    pops: u64,
}

impl StreamState {
    fn data_mut(&mut self, pad: &Pad) -> Option<&mut CollectData> {
        self.pads.iter_mut().find(|d| &d.pad == pad)
    }

    fn all_eos(&self) -> bool {
        !self.pads.is_empty() && self.pads.iter().all(|d| d.eos && d.buffer.is_none())
    }

    fn is_ready(&self) -> bool {
        if !self.started || self.pads.is_empty() {
            return false;
        }
        let any_queued = self.pads.iter().any(|d| d.buffer.is_some());
        any_queued
            && self
                .pads
                .iter()
                .filter(|d| d.waiting && !d.eos && !d.flushing)
                .all(|d| d.buffer.is_some())
    }
}

struct CollectInner {
    name: String,
    stream: Mutex<StreamState>,
    /// Signalled when a slot frees up or flushing changes.
    cond: Condvar,
    callbacks: Mutex<Callbacks>,
    clip: Mutex<Option<Arc<ClipFunction>>>,
    event: Mutex<Option<Arc<CollectEventFunction>>>,
}

/// Aggregation helper for elements with several sink pads. Cloning yields
/// another handle to the same helper.
#[derive(Clone)]
pub struct CollectPads {
    inner: Arc<CollectInner>,
}

impl CollectPads {
    /// Create a stopped helper without inputs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CollectInner {
                name: name.into(),
                stream: Mutex::new(StreamState::default()),
                cond: Condvar::new(),
                callbacks: Mutex::new(Callbacks {
                    callback: Callback::None,
                    compare: None,
                }),
                clip: Mutex::new(None),
                event: Mutex::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<CollectInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Helper name used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Use the buffer-function callback style.
    pub fn set_buffer_function<F>(&self, f: F)
    where
        F: Fn(&CollectPads, Option<(Pad, Buffer)>) -> FlowResult + Send + 'static,
    {
        lock(&self.inner.callbacks).callback = Callback::Buffer(Box::new(f));
    }

    /// Use the collected-function callback style.
    pub fn set_collected_function<F>(&self, f: F)
    where
        F: Fn(&CollectPads) -> FlowResult + Send + 'static,
    {
        lock(&self.inner.callbacks).callback = Callback::Collected(Box::new(f));
    }

    /// Replace the comparator. The default orders by presentation
    /// timestamp, buffers without one first.
    pub fn set_compare_function<F>(&self, f: F)
    where
        F: Fn(&Pad, &Buffer, &Pad, &Buffer) -> Ordering + Send + 'static,
    {
        lock(&self.inner.callbacks).compare = Some(Box::new(f));
    }

    /// Set the clip hook.
    pub fn set_clip_function<F>(&self, f: F)
    where
        F: Fn(&CollectPads, &Pad, Buffer) -> Option<Buffer> + Send + Sync + 'static,
    {
        *lock(&self.inner.clip) = Some(Arc::new(Box::new(f)));
    }

    /// Set the event hook for input pads.
    pub fn set_event_function<F>(&self, f: F)
    where
        F: Fn(&CollectPads, &Pad, Event) -> bool + Send + Sync + 'static,
    {
        *lock(&self.inner.event) = Some(Arc::new(Box::new(f)));
    }

    // ------------------------------------------------------------------------
    // Pads
    // ------------------------------------------------------------------------

    /// Create an input pad from `template` whose chain and event functions
    /// route into this helper. The caller adds it to its element.
    pub fn new_sink_pad(&self, template: &PadTemplate, name: impl Into<String>) -> Pad {
        let chain_weak = Arc::downgrade(&self.inner);
        let event_weak = Arc::downgrade(&self.inner);
        let mode_weak = Arc::downgrade(&self.inner);
        let pad = Pad::builder_from_template(template, name)
            .chain_function(move |pad, buffer| match CollectPads::from_weak(&chain_weak) {
                Some(collect) => collect.chain(pad, buffer),
                None => Err(FlowError::Flushing),
            })
            .event_function(move |pad, event| match CollectPads::from_weak(&event_weak) {
                Some(collect) => collect.event(pad, event),
                None => false,
            })
            .activatemode_function(move |pad, _, active| {
                if let Some(collect) = CollectPads::from_weak(&mode_weak) {
                    collect.activate_input(pad, active);
                }
                true
            })
            .build();

        let mut stream = lock(&self.inner.stream);
        let flushing = !stream.started;
        stream.pads.push(CollectData {
            pad: pad.clone(),
            buffer: None,
            eos: false,
            flushing,
            waiting: true,
            locked: false,
        });
        debug!(collect = %self.name(), pad = %pad.name(), "added input");
        pad
    }

    /// Stop collecting on `pad`. Returns false if it is not an input.
    pub fn remove_pad(&self, pad: &Pad) -> bool {
        let mut stream = lock(&self.inner.stream);
        let before = stream.pads.len();
        stream.pads.retain(|d| &d.pad != pad);
        let removed = stream.pads.len() != before;
        if removed {
            self.inner.cond.notify_all();
            debug!(collect = %self.name(), pad = %pad.name(), "removed input");
        }
        removed
    }

    /// Input pads in creation order.
    pub fn pads(&self) -> Vec<Pad> {
        lock(&self.inner.stream)
            .pads
            .iter()
            .map(|d| d.pad.clone())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start accepting data.
    pub fn start(&self) {
        let mut stream = lock(&self.inner.stream);
        stream.started = true;
        stream.eos_sent = false;
        stream.last_error = None;
        for data in &mut stream.pads {
            data.flushing = false;
            data.eos = false;
        }
        debug!(collect = %self.name(), "started");
    }

    /// Stop, dropping queued buffers and waking blocked producers.
    pub fn stop(&self) {
        let mut stream = lock(&self.inner.stream);
        stream.started = false;
        for data in &mut stream.pads {
            data.flushing = true;
            data.buffer = None;
        }
        self.inner.cond.notify_all();
        debug!(collect = %self.name(), "stopped");
    }

    /// Set or clear flushing on every input. Flushing drops queued buffers
    /// and wakes blocked producers.
    pub fn set_flushing(&self, flushing: bool) {
        let mut stream = lock(&self.inner.stream);
        for data in &mut stream.pads {
            data.flushing = flushing;
            if flushing {
                data.buffer = None;
            }
        }
        if !flushing {
            stream.last_error = None;
        }
        self.inner.cond.notify_all();
    }

    /// Include or exclude `pad` from the readiness check. Has no effect on
    /// a locked pad; returns whether the change was applied.
    pub fn set_waiting(&self, pad: &Pad, waiting: bool) -> bool {
        let mut stream = lock(&self.inner.stream);
        let Some(data) = stream.data_mut(pad) else {
            return false;
        };
        if data.locked {
            return false;
        }
        data.waiting = waiting;
        true
    }

    /// Lock or unlock the waiting state of `pad`.
    pub fn set_locked(&self, pad: &Pad, locked: bool) -> bool {
        let mut stream = lock(&self.inner.stream);
        match stream.data_mut(pad) {
            Some(data) => {
                data.locked = locked;
                true
            }
            None => false,
        }
    }

    /// True if `pad` takes part in the readiness check.
    pub fn is_waiting(&self, pad: &Pad) -> bool {
        lock(&self.inner.stream)
            .pads
            .iter()
            .any(|d| &d.pad == pad && d.waiting)
    }

    /// True if every input is EOS with nothing left queued.
    pub fn all_eos(&self) -> bool {
        lock(&self.inner.stream).all_eos()
    }

    /// True if `pad` received EOS.
    pub fn is_eos(&self, pad: &Pad) -> bool {
        lock(&self.inner.stream)
            .pads
            .iter()
            .any(|d| &d.pad == pad && d.eos)
    }

    // ------------------------------------------------------------------------
    // Queue access
    // ------------------------------------------------------------------------

    /// The buffer queued on `pad`, without dequeuing it.
    pub fn peek(&self, pad: &Pad) -> Option<Buffer> {
        lock(&self.inner.stream)
            .pads
            .iter()
            .find(|d| &d.pad == pad)
            .and_then(|d| d.buffer.clone())
    }

    /// Dequeue the buffer on `pad`, freeing its slot.
    pub fn pop(&self, pad: &Pad) -> Option<Buffer> {
        let mut stream = lock(&self.inner.stream);
        let buffer = stream.data_mut(pad).and_then(|d| d.buffer.take());
        if buffer.is_some() {
            stream.pops += 1;
            self.inner.cond.notify_all();
        }
        buffer
    }

    /// Number of inputs with a queued buffer.
    pub fn queued(&self) -> usize {
        lock(&self.inner.stream)
            .pads
            .iter()
            .filter(|d| d.buffer.is_some())
            .count()
    }

    // ------------------------------------------------------------------------
    // Pad hooks
    // ------------------------------------------------------------------------

    /// A deactivated input flushes so that its blocked producer returns.
    fn activate_input(&self, pad: &Pad, active: bool) {
        let mut stream = lock(&self.inner.stream);
        let started = stream.started;
        if let Some(data) = stream.data_mut(pad) {
            data.flushing = !active || !started;
            data.eos = false;
            if !active {
                data.buffer = None;
            }
        }
        self.inner.cond.notify_all();
    }

    fn chain(&self, pad: &Pad, buffer: Buffer) -> FlowResult {
        let clip = lock(&self.inner.clip).clone();
        let buffer = match clip {
            Some(clip) => match clip(self, pad, buffer) {
                Some(buffer) => buffer,
                None => {
                    trace!(collect = %self.name(), pad = %pad.name(), "clipped buffer");
                    return Ok(FlowSuccess::Ok);
                }
            },
            None => buffer,
        };

        {
            let mut stream = lock(&self.inner.stream);
            loop {
                if let Some(err) = stream.last_error {
                    return Err(err);
                }
                let started = stream.started;
                let Some(data) = stream.data_mut(pad) else {
                    return Err(FlowError::NotLinked);
                };
                if data.flushing || !started {
                    return Err(FlowError::Flushing);
                }
                if data.eos {
                    return Err(FlowError::Eos);
                }
                if data.buffer.is_none() {
                    data.buffer = Some(buffer);
                    break;
                }
                trace!(collect = %self.name(), pad = %pad.name(), "slot taken, waiting");
                stream = wait(&self.inner.cond, stream);
            }
        }

        self.check_collected()
    }

    fn event(&self, pad: &Pad, event: Event) -> bool {
        let mut collect_now = false;
        {
            let mut stream = lock(&self.inner.stream);
            match &event {
                Event::FlushStart => {
                    if let Some(data) = stream.data_mut(pad) {
                        data.flushing = true;
                        data.buffer = None;
                    }
                    self.inner.cond.notify_all();
                }
                Event::FlushStop(_) => {
                    let started = stream.started;
                    if let Some(data) = stream.data_mut(pad) {
                        data.flushing = !started;
                        data.eos = false;
                        data.buffer = None;
                    }
                    stream.eos_sent = false;
                    stream.last_error = None;
                }
                Event::Eos => {
                    if let Some(data) = stream.data_mut(pad) {
                        data.eos = true;
                    }
                    collect_now = true;
                }
                _ => {}
            }
        }
        if collect_now {
            debug!(collect = %self.name(), pad = %pad.name(), "input reached EOS");
            // The flow result belongs to the data path; EOS itself succeeded.
            let _ = self.check_collected();
        }

        let handler = lock(&self.inner.event).clone();
        match handler {
            Some(handler) => handler(self, pad, event),
            None => match event {
                Event::FlushStart | Event::FlushStop(_) | Event::Eos => true,
                other => pad.event_default(other),
            },
        }
    }

    // ------------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------------

    /// Run callbacks for as long as the inputs are ready.
    fn check_collected(&self) -> FlowResult {
        let callbacks = lock(&self.inner.callbacks);
        let mut result = Ok(FlowSuccess::Ok);
        loop {
            let mut stream = lock(&self.inner.stream);
            if let Some(err) = stream.last_error {
                return Err(err);
            }

            if !stream.is_ready() {
                if stream.started && stream.all_eos() && !stream.eos_sent {
                    stream.eos_sent = true;
                    drop(stream);
                    debug!(collect = %self.name(), "all inputs EOS");
                    return self.record(match &callbacks.callback {
                        Callback::Buffer(f) => f(self, None),
                        Callback::Collected(f) => f(self),
                        Callback::None => Ok(FlowSuccess::Ok),
                    });
                }
                return result;
            }

            match &callbacks.callback {
                Callback::None => return result,
                Callback::Buffer(f) => {
                    let winner = stream
                        .pads
                        .iter_mut()
                        .filter(|d| d.buffer.is_some())
                        .min_by(|a, b| {
                            let (Some(ba), Some(bb)) = (&a.buffer, &b.buffer) else {
                                return Ordering::Equal;
                            };
                            match &callbacks.compare {
                                Some(cmp) => cmp(&a.pad, ba, &b.pad, bb),
                                None => ba.pts().cmp(&bb.pts()),
                            }
                        })
                        .and_then(|d| d.buffer.take().map(|b| (d.pad.clone(), b)));
                    stream.pops += 1;
                    self.inner.cond.notify_all();
                    drop(stream);

                    let Some((pad, buffer)) = winner else {
                        return result;
                    };
                    trace!(collect = %self.name(), pad = %pad.name(), pts = ?buffer.pts(), "collected");
                    result = self.record(f(self, Some((pad, buffer))));
                    if result.is_err() {
                        return result;
                    }
                }
                Callback::Collected(f) => {
                    let pops = stream.pops;
                    drop(stream);
                    result = self.record(f(self));
                    if result.is_err() || lock(&self.inner.stream).pops == pops {
                        return result;
                    }
                }
            }
        }
    }

    fn record(&self, result: FlowResult) -> FlowResult {
        if let Err(err) = result {
            debug!(collect = %self.name(), error = %err, "callback returned error");
            lock(&self.inner.stream).last_error = Some(err);
            self.inner.cond.notify_all();
        }
        result
    }
}

impl fmt::Debug for CollectPads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stream = lock(&self.inner.stream);
        f.debug_struct("CollectPads")
            .field("name", &self.inner.name)
            .field("inputs", &stream.pads.len())
            .field("started", &stream.started)
            .finish()
    }
}
