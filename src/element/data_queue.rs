//! Bounded, flush-interruptible blocking queue.
//!
//! [`DataQueue`] is the one place where a streaming thread hands data to
//! another thread. Producers block while the queue is full, consumers block
//! while it is empty, and [`DataQueue::set_flushing`] wakes both sides so
//! they return [`FlowError::Flushing`] instead of waiting forever.
//!
//! Only data items (buffers) count towards the limits. Events and other
//! control items are always accepted so that EOS and segment updates can
//! never deadlock behind a full queue.

use crate::buffer::Buffer;
use crate::clock::ClockTime;
use crate::flow::FlowError;
use crate::sync::{lock, wait, wait_timeout};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// What happens when a data item arrives at a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakyMode {
    /// Block until space is available.
    #[default]
    None,
    /// Drop the incoming item.
    Upstream,
    /// Drop the oldest queued data item.
    Downstream,
}

/// Queue limits. A limit of zero (or `None` for time) is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of queued data items.
    pub max_buffers: usize,
    /// Maximum number of queued payload bytes.
    pub max_bytes: usize,
    /// Maximum summed duration of queued data items.
    pub max_time: Option<ClockTime>,
    /// Behaviour when full.
    pub leaky: LeakyMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_buffers: 200,
            max_bytes: 10 * 1024 * 1024,
            max_time: Some(ClockTime::SECOND),
            leaky: LeakyMode::None,
        }
    }
}

impl QueueConfig {
    /// Config without any limit.
    pub fn unlimited() -> Self {
        Self {
            max_buffers: 0,
            max_bytes: 0,
            max_time: None,
            leaky: LeakyMode::None,
        }
    }

    /// Set the buffer limit.
    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    /// Set the byte limit.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Set the time limit.
    pub fn with_max_time(mut self, max_time: Option<ClockTime>) -> Self {
        self.max_time = max_time;
        self
    }

    /// Set the leaky mode.
    pub fn with_leaky(mut self, leaky: LeakyMode) -> Self {
        self.leaky = leaky;
        self
    }
}

/// Items stored in a [`DataQueue`].
pub trait DataQueueItem: Send {
    /// Payload size in bytes.
    fn size(&self) -> usize;

    /// Duration, if known.
    fn duration(&self) -> Option<ClockTime>;

    /// Whether the item counts towards the limits and may be leaked.
    fn is_data(&self) -> bool {
        true
    }
}

impl DataQueueItem for Buffer {
    fn size(&self) -> usize {
        self.len()
    }

    fn duration(&self) -> Option<ClockTime> {
        Buffer::duration(self)
    }
}

/// Fill level of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueLevel {
    /// Queued data items.
    pub buffers: usize,
    /// Queued payload bytes.
    pub bytes: usize,
    /// Summed duration of queued data items.
    pub time: ClockTime,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct State<T> {
    items: VecDeque<T>,
    level: QueueLevel,
    config: QueueConfig,
    flushing: bool,
}

impl<T: DataQueueItem> State<T> {
    fn is_full(&self) -> bool {
        let c = &self.config;
        (c.max_buffers > 0 && self.level.buffers >= c.max_buffers)
            || (c.max_bytes > 0 && self.level.bytes >= c.max_bytes)
            || c.max_time.is_some_and(|max| self.level.time >= max)
    }

    fn enqueue(&mut self, item: T) {
        if item.is_data() {
            self.level.buffers += 1;
            self.level.bytes += item.size();
            self.level.time += item.duration().unwrap_or(ClockTime::ZERO);
        }
        self.items.push_back(item);
    }

    fn dequeue(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        self.forget(&item);
        Some(item)
    }

    fn forget(&mut self, item: &T) {
        if item.is_data() {
            self.level.buffers -= 1;
            self.level.bytes = self.level.bytes.saturating_sub(item.size());
            self.level.time = self
                .level
                .time
                .saturating_sub(item.duration().unwrap_or(ClockTime::ZERO));
        }
    }

    /// Remove the oldest data item, leaving control items in place.
    fn leak_oldest(&mut self) -> Option<T> {
        let index = self.items.iter().position(DataQueueItem::is_data)?;
        let item = self.items.remove(index)?;
        self.forget(&item);
        Some(item)
    }
}

/// Thread-safe FIFO shared between one producer and one consumer side.
///
/// Cloning yields another handle to the same queue.
///
/// ```rust
/// use padflow::buffer::Buffer;
/// use padflow::element::{DataQueue, QueueConfig};
///
/// let queue = DataQueue::new(QueueConfig::unlimited());
/// queue.push(Buffer::from_slice(b"abc")).unwrap();
/// assert_eq!(queue.pop().unwrap().as_bytes(), b"abc");
/// ```
pub struct DataQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DataQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: DataQueueItem> DataQueue<T> {
    /// Create a queue with the given limits.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(config.max_buffers.clamp(16, 1024)),
                    level: QueueLevel::default(),
                    config,
                    flushing: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    /// Enqueue an item.
    ///
    /// Blocks while the queue is full in [`LeakyMode::None`]. In a leaky
    /// mode, returns the item that was dropped to make room (the incoming
    /// one for `Upstream`, the oldest for `Downstream`).
    ///
    /// Returns `Err(Flushing)` if the queue is flushing, including when a
    /// flush starts while blocked; the item is dropped in that case.
    pub fn push(&self, item: T) -> Result<Option<T>, FlowError> {
        let mut state = lock(&self.inner.state);
        let mut leaked = None;

        if item.is_data() {
            while !state.flushing && state.is_full() {
                match state.config.leaky {
                    LeakyMode::None => state = wait(&self.inner.not_full, state),
                    LeakyMode::Upstream => return Ok(Some(item)),
                    LeakyMode::Downstream => match state.leak_oldest() {
                        Some(old) => {
                            leaked = Some(old);
                            break;
                        }
                        None => break,
                    },
                }
            }
        }

        if state.flushing {
            return Err(FlowError::Flushing);
        }

        state.enqueue(item);
        self.inner.not_empty.notify_one();
        Ok(leaked)
    }

    /// Dequeue the oldest item, blocking while the queue is empty.
    pub fn pop(&self) -> Result<T, FlowError> {
        let mut state = lock(&self.inner.state);
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if let Some(item) = state.dequeue() {
                self.inner.not_full.notify_one();
                return Ok(item);
            }
            state = wait(&self.inner.not_empty, state);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`, returning
    /// `Ok(None)`.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, FlowError> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inner.state);
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if let Some(item) = state.dequeue() {
                self.inner.not_full.notify_one();
                return Ok(Some(item));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let (guard, _) = wait_timeout(&self.inner.not_empty, state, remaining);
            state = guard;
        }
    }

    /// Dequeue without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = lock(&self.inner.state);
        let item = state.dequeue();
        if item.is_some() {
            self.inner.not_full.notify_one();
        }
        item
    }

    /// Enter or leave flushing mode.
    ///
    /// Entering wakes every blocked producer and consumer; they return
    /// `Err(Flushing)`. Queued items stay until [`flush`](Self::flush).
    pub fn set_flushing(&self, flushing: bool) {
        let mut state = lock(&self.inner.state);
        state.flushing = flushing;
        if flushing {
            self.inner.not_empty.notify_all();
            self.inner.not_full.notify_all();
        }
    }

    /// Drop every queued item.
    pub fn flush(&self) {
        let mut state = lock(&self.inner.state);
        state.items.clear();
        state.level = QueueLevel::default();
        self.inner.not_full.notify_all();
    }

    /// Whether the queue is flushing.
    pub fn is_flushing(&self) -> bool {
        lock(&self.inner.state).flushing
    }

    /// Number of queued items, data and control.
    pub fn len(&self) -> usize {
        lock(&self.inner.state).items.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current fill level.
    pub fn level(&self) -> QueueLevel {
        lock(&self.inner.state).level
    }

    /// Check if any limit is reached.
    pub fn is_full(&self) -> bool {
        lock(&self.inner.state).is_full()
    }

    /// Current limits.
    pub fn config(&self) -> QueueConfig {
        lock(&self.inner.state).config
    }
}

impl<T> std::fmt::Debug for DataQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("DataQueue")
            .field("items", &state.items.len())
            .field("level", &state.level)
            .field("flushing", &state.flushing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use std::thread;

    fn buffer(size: usize, pts_ms: u64) -> Buffer {
        Buffer::from_vec(vec![0; size]).with_metadata(
            Metadata::new()
                .with_pts(ClockTime::from_millis(pts_ms))
                .with_duration(ClockTime::from_millis(10)),
        )
    }

    #[derive(Debug, PartialEq)]
    enum Item {
        Data(usize),
        Control,
    }

    impl DataQueueItem for Item {
        fn size(&self) -> usize {
            match self {
                Item::Data(n) => *n,
                Item::Control => 0,
            }
        }

        fn duration(&self) -> Option<ClockTime> {
            None
        }

        fn is_data(&self) -> bool {
            matches!(self, Item::Data(_))
        }
    }

    #[test]
    fn test_fifo_order_and_level() {
        let queue = DataQueue::new(QueueConfig::unlimited());
        queue.push(buffer(100, 0)).unwrap();
        queue.push(buffer(50, 10)).unwrap();

        let level = queue.level();
        assert_eq!(level.buffers, 2);
        assert_eq!(level.bytes, 150);
        assert_eq!(level.time, ClockTime::from_millis(20));

        assert_eq!(queue.pop().unwrap().pts(), Some(ClockTime::ZERO));
        assert_eq!(queue.pop().unwrap().pts(), Some(ClockTime::from_millis(10)));
        assert!(queue.is_empty());
        assert_eq!(queue.level(), QueueLevel::default());
    }

    #[test]
    fn test_leaky_upstream_returns_incoming() {
        let queue = DataQueue::new(
            QueueConfig::unlimited()
                .with_max_buffers(2)
                .with_leaky(LeakyMode::Upstream),
        );
        assert!(queue.push(buffer(1, 0)).unwrap().is_none());
        assert!(queue.push(buffer(1, 10)).unwrap().is_none());
        let leaked = queue.push(buffer(1, 20)).unwrap().unwrap();
        assert_eq!(leaked.pts(), Some(ClockTime::from_millis(20)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_leaky_downstream_drops_oldest() {
        let queue = DataQueue::new(
            QueueConfig::unlimited()
                .with_max_buffers(2)
                .with_leaky(LeakyMode::Downstream),
        );
        queue.push(buffer(1, 0)).unwrap();
        queue.push(buffer(1, 10)).unwrap();
        let leaked = queue.push(buffer(1, 20)).unwrap().unwrap();
        assert_eq!(leaked.pts(), Some(ClockTime::ZERO));
        assert_eq!(queue.pop().unwrap().pts(), Some(ClockTime::from_millis(10)));
    }

    #[test]
    fn test_byte_and_time_limits() {
        let bytes = DataQueue::new(QueueConfig::unlimited().with_max_bytes(200));
        bytes.push(buffer(100, 0)).unwrap();
        assert!(!bytes.is_full());
        bytes.push(buffer(100, 10)).unwrap();
        assert!(bytes.is_full());

        let time = DataQueue::new(
            QueueConfig::unlimited().with_max_time(Some(ClockTime::from_millis(20))),
        );
        time.push(buffer(1, 0)).unwrap();
        assert!(!time.is_full());
        time.push(buffer(1, 10)).unwrap();
        assert!(time.is_full());
    }

    #[test]
    fn test_control_items_bypass_limits() {
        let queue = DataQueue::new(
            QueueConfig::unlimited()
                .with_max_buffers(1)
                .with_leaky(LeakyMode::Downstream),
        );
        queue.push(Item::Data(4)).unwrap();
        queue.push(Item::Control).unwrap();
        assert_eq!(queue.len(), 2);

        // Leaking skips the control item.
        let leaked = queue.push(Item::Data(8)).unwrap();
        assert_eq!(leaked, Some(Item::Data(4)));
        assert_eq!(queue.pop().unwrap(), Item::Control);
        assert_eq!(queue.pop().unwrap(), Item::Data(8));
    }

    #[test]
    fn test_blocking_push_resumes_after_pop() {
        let queue = DataQueue::new(QueueConfig::unlimited().with_max_buffers(1));
        queue.push(buffer(1, 0)).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(buffer(1, 10)))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.len(), 1);

        queue.pop().unwrap();
        assert!(producer.join().unwrap().unwrap().is_none());
        assert_eq!(queue.pop().unwrap().pts(), Some(ClockTime::from_millis(10)));
    }

    #[test]
    fn test_flushing_wakes_consumer() {
        let queue: DataQueue<Buffer> = DataQueue::new(QueueConfig::default());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(30));
        queue.set_flushing(true);
        assert_eq!(consumer.join().unwrap().unwrap_err(), FlowError::Flushing);
    }

    #[test]
    fn test_flushing_wakes_producer() {
        let queue = DataQueue::new(QueueConfig::unlimited().with_max_buffers(1));
        queue.push(buffer(1, 0)).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(buffer(1, 10)))
        };
        thread::sleep(Duration::from_millis(30));
        queue.set_flushing(true);
        assert_eq!(producer.join().unwrap().unwrap_err(), FlowError::Flushing);

        queue.flush();
        queue.set_flushing(false);
        assert!(queue.is_empty());
        queue.push(buffer(1, 20)).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_timeout() {
        let queue: DataQueue<Buffer> = DataQueue::new(QueueConfig::default());
        assert!(queue.pop_timeout(Duration::from_millis(10)).unwrap().is_none());
        queue.push(buffer(1, 0)).unwrap();
        assert!(queue.pop_timeout(Duration::from_millis(10)).unwrap().is_some());
    }
}
