//! Queue: a thread boundary between an upstream push and a downstream
//! streaming task.
//!
//! The sink pad's chain function enqueues into a [`DataQueue`]; a [`Task`]
//! owned by the source pad dequeues and pushes downstream. Serialized
//! events travel through the queue in order with the buffers.
//!
//! ```text
//!  upstream thread             queue task thread
//!  ──chain──▶ [DataQueue] ──pop──▶ src.push ──▶ downstream
//! ```
//!
//! A downstream fatal or not-linked return stops the loop, posts an error
//! message and is reported to upstream on its next push.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::element::{
    DataQueue, DataQueueItem, DefaultElementImpl, Element, LeakyMode, Pad, PadMode, PadTemplate,
    QueueConfig, QueueLevel, Task,
};
use crate::event::Event;
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::observability::{record_buffer_dropped, record_queue_depth};
use crate::pipeline::Message;
use crate::sync::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace, warn};

/// Item travelling through a [`Queue`].
#[derive(Debug)]
pub enum QueueItem {
    /// A buffer.
    Buffer(Buffer),
    /// A serialized event.
    Event(Event),
}

impl DataQueueItem for QueueItem {
    fn size(&self) -> usize {
        match self {
            QueueItem::Buffer(b) => b.len(),
            QueueItem::Event(_) => 0,
        }
    }

    fn duration(&self) -> Option<ClockTime> {
        match self {
            QueueItem::Buffer(b) => b.duration(),
            QueueItem::Event(_) => None,
        }
    }

    fn is_data(&self) -> bool {
        matches!(self, QueueItem::Buffer(_))
    }
}

struct QueueShared {
    name: String,
    queue: DataQueue<QueueItem>,
    /// Last downstream result; upstream pushes fail with it once it is an
    /// error.
    srcresult: Mutex<FlowResult>,
    task: Mutex<Option<Task>>,
    dropped: AtomicU64,
}

impl QueueShared {
    fn srcresult(&self) -> FlowResult {
        *lock(&self.srcresult)
    }

    fn set_srcresult(&self, result: FlowResult) {
        *lock(&self.srcresult) = result;
    }

    fn task(&self) -> Option<Task> {
        lock(&self.task).clone()
    }

    fn chain(&self, buffer: Buffer) -> FlowResult {
        if let Err(e) = self.srcresult() {
            trace!(queue = %self.name, error = %e, "refusing buffer");
            return Err(e);
        }
        match self.queue.push(QueueItem::Buffer(buffer))? {
            Some(_) => {
                trace!(queue = %self.name, "queue full, leaked buffer");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                record_buffer_dropped(&self.name);
            }
            None => record_queue_depth(&self.name, self.queue.len()),
        }
        Ok(FlowSuccess::Ok)
    }

    fn sink_event(&self, src: &Pad, event: Event) -> bool {
        match event {
            Event::FlushStart => {
                self.queue.set_flushing(true);
                let forwarded = src.push_event(Event::FlushStart);
                if let Some(task) = self.task() {
                    if let Err(e) = task.pause_and_wait() {
                        warn!(queue = %self.name, error = %e, "pausing task failed");
                    }
                }
                forwarded
            }
            Event::FlushStop(stop) => {
                self.queue.flush();
                self.queue.set_flushing(false);
                self.set_srcresult(Ok(FlowSuccess::Ok));
                let forwarded = src.push_event(Event::FlushStop(stop));
                if src.mode() == PadMode::Push {
                    if let Some(task) = self.task() {
                        if let Err(e) = task.start() {
                            warn!(queue = %self.name, error = %e, "restarting task failed");
                        }
                    }
                }
                forwarded
            }
            event if event.is_serialized() => {
                if let Err(e) = self.srcresult() {
                    debug!(queue = %self.name, error = %e, event = %event.name(), "dropping event");
                    return false;
                }
                self.queue.push(QueueItem::Event(event)).is_ok()
            }
            event => src.push_event(event),
        }
    }

    /// One iteration of the streaming task.
    fn run(&self, task: &Task, src: &Pad) {
        let item = match self.queue.pop() {
            Ok(item) => item,
            Err(e) => {
                self.pause(task, src, e);
                return;
            }
        };
        record_queue_depth(&self.name, self.queue.len());

        match item {
            QueueItem::Buffer(buffer) => {
                if let Err(e) = src.push(buffer) {
                    self.pause(task, src, e);
                }
            }
            QueueItem::Event(event) => {
                let eos = matches!(event, Event::Eos);
                let caps = matches!(event, Event::Caps(_));
                let handled = src.push_event(event);
                if eos {
                    self.pause(task, src, FlowError::Eos);
                } else if caps && !handled {
                    self.pause(task, src, FlowError::NotNegotiated);
                }
            }
        }
    }

    fn pause(&self, task: &Task, src: &Pad, error: FlowError) {
        self.set_srcresult(Err(error));
        // Pausing from the task thread cannot fail.
        let _ = task.pause();
        debug!(queue = %self.name, reason = %error, "pausing task");

        if error.is_fatal() || error == FlowError::NotLinked || error == FlowError::NotNegotiated {
            // Wake upstream blocked on a full queue.
            self.queue.set_flushing(true);
            if let Some(element) = src.parent_element() {
                element.post_message(Message::error(
                    element.name(),
                    format!("streaming stopped, reason {}", error.kind()),
                    Some(format!("downstream returned {error}")),
                ));
            }
            src.push_event(Event::Eos);
        }
    }

    fn activate_src(self: &Arc<Self>, src: &Pad, active: bool) -> bool {
        if active {
            self.queue.set_flushing(false);
            self.set_srcresult(Ok(FlowSuccess::Ok));
            let task = {
                let mut slot = lock(&self.task);
                slot.get_or_insert_with(|| {
                    let weak: Weak<QueueShared> = Arc::downgrade(self);
                    let src = src.clone();
                    Task::new(format!("{}:src", self.name), move |task| match weak.upgrade() {
                        Some(shared) => shared.run(task, &src),
                        None => task.stop(),
                    })
                })
                .clone()
            };
            match task.start() {
                Ok(()) => true,
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "starting task failed");
                    false
                }
            }
        } else {
            self.queue.set_flushing(true);
            self.set_srcresult(Err(FlowError::Flushing));
            let task = lock(&self.task).take();
            if let Some(task) = task {
                task.join();
            }
            true
        }
    }
}

/// A queueing element decoupling upstream and downstream threads.
///
/// ```rust
/// use padflow::elements::Queue;
/// use padflow::element::{LeakyMode, QueueConfig};
///
/// let queue = Queue::with_config(
///     "q",
///     QueueConfig::default().with_max_buffers(10).with_leaky(LeakyMode::Downstream),
/// );
/// assert_eq!(queue.level().buffers, 0);
/// ```
pub struct Queue {
    element: Element,
    shared: Arc<QueueShared>,
}

impl Queue {
    /// Create a queue with default limits.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, QueueConfig::default())
    }

    /// Create a queue with explicit limits and leaky mode.
    pub fn with_config(name: impl Into<String>, config: QueueConfig) -> Self {
        let name = name.into();
        let queue = DataQueue::new(config);
        queue.set_flushing(true);
        let shared = Arc::new(QueueShared {
            name: name.clone(),
            queue,
            srcresult: Mutex::new(Err(FlowError::Flushing)),
            task: Mutex::new(None),
            dropped: AtomicU64::new(0),
        });

        let src = {
            let shared = Arc::clone(&shared);
            Pad::builder_from_template(&PadTemplate::src(Caps::new_any()), "src")
                .proxy_caps(true)
                .activatemode_function(move |pad, mode, active| {
                    mode == PadMode::Push && shared.activate_src(pad, active)
                })
                .build()
        };
        let sink = {
            let chain_shared = Arc::clone(&shared);
            let event_shared = Arc::clone(&shared);
            let mode_shared = Arc::clone(&shared);
            let event_src = src.clone();
            Pad::builder_from_template(&PadTemplate::sink(Caps::new_any()), "sink")
                .proxy_caps(true)
                .chain_function(move |_, buffer| chain_shared.chain(buffer))
                .event_function(move |_, event| event_shared.sink_event(&event_src, event))
                .activatemode_function(move |_, mode, active| {
                    if !active {
                        mode_shared.queue.set_flushing(true);
                    }
                    mode == PadMode::Push
                })
                .build()
        };
        sink.set_internal_links(std::slice::from_ref(&src));
        src.set_internal_links(std::slice::from_ref(&sink));

        let element = Element::new(name, DefaultElementImpl);
        for pad in [&sink, &src] {
            if let Err(e) = element.add_pad(pad) {
                tracing::error!(error = %e, "queue pad setup failed");
            }
        }
        Self { element, shared }
    }

    /// The element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Current fill level.
    pub fn level(&self) -> QueueLevel {
        self.shared.queue.level()
    }

    /// Limits and leaky mode.
    pub fn config(&self) -> QueueConfig {
        self.shared.queue.config()
    }

    /// Buffers leaked because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Check if the queue leaks instead of blocking.
    pub fn is_leaky(&self) -> bool {
        self.config().leaky != LeakyMode::None
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Some(task) = self.shared.task() {
            self.shared.queue.set_flushing(true);
            task.join();
        }
    }
}
