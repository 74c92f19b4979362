//! BytesSrc: serves an in-memory byte array in push or pull mode.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{DefaultElementImpl, Element, Pad, PadMode, PadTemplate, Task};
use crate::event::{Event, Format, Query, SeekEvent, SeekFlags, SegmentEvent, StreamStartEvent};
use crate::flow::FlowError;
use crate::metadata::{BufferFlags, Metadata};
use crate::pipeline::Message;
use crate::sync::lock;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace, warn};

/// Default bytes per pushed buffer.
pub const DEFAULT_BLOCKSIZE: usize = 4096;

struct SrcState {
    /// Next byte served in push mode.
    position: u64,
    need_stream_start: bool,
    need_segment: bool,
    discont: bool,
}

struct BytesSrcShared {
    name: String,
    data: Arc<[u8]>,
    blocksize: Mutex<usize>,
    caps: Mutex<Caps>,
    state: Mutex<SrcState>,
    task: Mutex<Option<Task>>,
}

impl BytesSrcShared {
    /// The slice `[offset, offset + size)` clipped to the data.
    fn block(&self, offset: u64, size: usize) -> Result<Buffer, FlowError> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Err(FlowError::Eos);
        }
        let end = len.min(offset.saturating_add(size as u64));
        let bytes = &self.data[offset as usize..end as usize];
        Ok(Buffer::from_slice(bytes).with_metadata(Metadata::new().with_offsets(offset, end)))
    }

    /// Push stream-start, caps and segment before the first block.
    fn push_stream_events(&self, pad: &Pad) -> Result<(), FlowError> {
        let (stream_start, segment, position) = {
            let mut state = lock(&self.state);
            let flags = (state.need_stream_start, state.need_segment, state.position);
            state.need_stream_start = false;
            state.need_segment = false;
            flags
        };
        if stream_start {
            pad.push_event(Event::StreamStart(StreamStartEvent::new(self.name.clone())));
            let caps = lock(&self.caps).clone();
            if !pad.push_event(Event::Caps(caps)) {
                return Err(FlowError::NotNegotiated);
            }
        }
        if segment {
            let len = self.data.len() as u64;
            pad.push_event(Event::Segment(SegmentEvent::new_bytes(position, Some(len))));
        }
        Ok(())
    }

    fn getrange(&self, pad: &Pad, offset: u64, size: usize) -> Result<Buffer, FlowError> {
        self.push_stream_events(pad)?;
        let buffer = self.block(offset, size)?;
        trace!(src = %self.name, offset, bytes = buffer.len(), "serving range");
        Ok(buffer)
    }

    /// One iteration of the push-mode task.
    fn run(&self, task: &Task, pad: &Pad) {
        if let Err(e) = self.push_stream_events(pad) {
            self.pause(task, pad, e);
            return;
        }

        let blocksize = *lock(&self.blocksize);
        let (offset, discont) = {
            let mut state = lock(&self.state);
            (state.position, std::mem::take(&mut state.discont))
        };
        let mut buffer = match self.block(offset, blocksize) {
            Ok(buffer) => buffer,
            Err(FlowError::Eos) => {
                debug!(src = %self.name, "end of data");
                pad.push_event(Event::Eos);
                self.pause(task, pad, FlowError::Eos);
                return;
            }
            Err(e) => {
                self.pause(task, pad, e);
                return;
            }
        };
        if discont {
            if let Some(meta) = buffer.meta_mut() {
                meta.flags.insert(BufferFlags::DISCONT);
            }
        }

        let len = buffer.len() as u64;
        match pad.push(buffer) {
            Ok(_) => lock(&self.state).position = offset + len,
            Err(e) => self.pause(task, pad, e),
        }
    }

    fn pause(&self, task: &Task, pad: &Pad, reason: FlowError) {
        let _ = task.pause();
        debug!(src = %self.name, %reason, "pausing task");
        if reason.is_fatal() || reason == FlowError::NotLinked {
            if let Some(element) = pad.parent_element() {
                element.post_message(Message::error(
                    element.name(),
                    format!("streaming stopped, reason {}", reason.kind()),
                    None,
                ));
            }
            pad.push_event(Event::Eos);
        }
    }

    fn activate_mode(self: &Arc<Self>, pad: &Pad, mode: PadMode, active: bool) -> bool {
        if active {
            {
                let mut state = lock(&self.state);
                state.position = 0;
                state.need_stream_start = true;
                state.need_segment = true;
                state.discont = true;
            }
            if mode != PadMode::Push {
                return true;
            }
            let task = {
                let weak: Weak<BytesSrcShared> = Arc::downgrade(self);
                let pad = pad.clone();
                Task::new(format!("{}:src", self.name), move |task| match weak.upgrade() {
                    Some(shared) => shared.run(task, &pad),
                    None => task.stop(),
                })
            };
            if let Err(e) = task.start() {
                warn!(src = %self.name, error = %e, "starting task failed");
                return false;
            }
            *lock(&self.task) = Some(task);
            true
        } else {
            let task = lock(&self.task).take();
            if let Some(task) = task {
                task.join();
            }
            true
        }
    }

    fn seek(&self, pad: &Pad, seek: &SeekEvent) -> bool {
        if seek.format != Format::Bytes || pad.mode() != PadMode::Push {
            debug!(src = %self.name, format = ?seek.format, mode = %pad.mode(), "refusing seek");
            return false;
        }
        if seek.start > self.data.len() as u64 {
            return false;
        }
        let flush = seek.flags.contains(SeekFlags::FLUSH);
        let task = lock(&self.task).clone();

        if flush {
            pad.push_event(Event::FlushStart);
        }
        if let Some(task) = &task {
            if let Err(e) = task.pause_and_wait() {
                warn!(src = %self.name, error = %e, "pausing task failed");
            }
        }
        {
            let mut state = lock(&self.state);
            state.position = seek.start;
            state.need_segment = true;
            state.discont = true;
        }
        if flush {
            pad.push_event(Event::FlushStop(Default::default()));
        }
        debug!(src = %self.name, position = seek.start, flush, "seek");
        if let Some(task) = &task {
            if let Err(e) = task.start() {
                warn!(src = %self.name, error = %e, "restarting task failed");
                return false;
            }
        }
        true
    }

    fn query(&self, pad: &Pad, query: &mut Query) -> bool {
        match query {
            Query::Scheduling(flags) => {
                flags.push = true;
                flags.pull = true;
                flags.seekable = true;
                true
            }
            Query::Duration {
                format: Format::Bytes,
                result,
            } => {
                *result = Some(self.data.len() as u64);
                true
            }
            Query::Position {
                format: Format::Bytes,
                result,
            } => {
                *result = Some(lock(&self.state).position);
                true
            }
            Query::Duration { .. } | Query::Position { .. } => false,
            _ => pad.query_default(query),
        }
    }
}

/// A source element serving a byte array.
///
/// In push mode a task sends blocks of `blocksize` bytes, then EOS. In pull
/// mode the getrange function returns any range of the data, shorter near
/// the end and `Eos` past it. Byte seeks are supported in push mode.
///
/// ```rust
/// use padflow::elements::BytesSrc;
///
/// let src = BytesSrc::new("src", b"hello world".to_vec()).with_blocksize(4);
/// assert_eq!(src.len(), 11);
/// ```
pub struct BytesSrc {
    element: Element,
    shared: Arc<BytesSrcShared>,
}

impl BytesSrc {
    /// Create a source over `data` with `application/octet-stream` caps.
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        let name = name.into();
        let caps = Caps::builder("application/octet-stream").build();
        let shared = Arc::new(BytesSrcShared {
            name: name.clone(),
            data: data.into(),
            blocksize: Mutex::new(DEFAULT_BLOCKSIZE),
            caps: Mutex::new(caps),
            state: Mutex::new(SrcState {
                position: 0,
                need_stream_start: true,
                need_segment: true,
                discont: true,
            }),
            task: Mutex::new(None),
        });

        let getrange_shared = Arc::clone(&shared);
        let mode_shared = Arc::clone(&shared);
        let event_shared = Arc::clone(&shared);
        let query_shared = Arc::clone(&shared);
        let pad = Pad::builder_from_template(&PadTemplate::src(Caps::new_any()), "src")
            .getrange_function(move |pad, offset, size| getrange_shared.getrange(pad, offset, size))
            .activatemode_function(move |pad, mode, active| {
                mode_shared.activate_mode(pad, mode, active)
            })
            .event_function(move |pad, event| match &event {
                Event::Seek(seek) => event_shared.seek(pad, seek),
                _ => pad.event_default(event),
            })
            .query_function(move |pad, query| query_shared.query(pad, query))
            .build();

        let element = Element::new(name, DefaultElementImpl);
        if let Err(e) = element.add_pad(&pad) {
            tracing::error!(error = %e, "bytessrc pad setup failed");
        }
        Self { element, shared }
    }

    /// Bytes per buffer in push mode.
    pub fn with_blocksize(self, blocksize: usize) -> Self {
        *lock(&self.shared.blocksize) = blocksize.max(1);
        self
    }

    /// Caps announced before the data.
    pub fn with_caps(self, caps: Caps) -> Self {
        *lock(&self.shared.caps) = caps;
        self
    }

    /// The element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// The source pad.
    pub fn pad(&self) -> Option<Pad> {
        self.element.pad("src")
    }

    /// Total bytes served.
    pub fn len(&self) -> usize {
        self.shared.data.len()
    }

    /// Check if there is no data.
    pub fn is_empty(&self) -> bool {
        self.shared.data.is_empty()
    }
}
