//! Events and queries.
//!
//! Events travel the same pad links as buffers but outside the flow-return
//! vocabulary: sending one yields a `bool` that only says whether some
//! handler took care of it.
//!
//! # Direction
//!
//! - **Downstream**: stream-start, caps, segment, gap, EOS
//! - **Upstream**: seek, reconfigure
//! - **Both**: flush-start, flush-stop, custom (direction chosen at creation)
//!
//! # Serialization
//!
//! Serialized events take effect at their position in the per-pad buffer
//! sequence. Flush-start is not serialized: it must overtake queued data to
//! unblock waiting threads.
//!
//! # Stickiness
//!
//! Stream-start, caps, segment and EOS are sticky: a pad remembers the
//! latest of each kind and replays them to a newly linked peer before the
//! next buffer. EOS stays stored until flush-stop.
//!
//! ```rust
//! use padflow::caps::Caps;
//! use padflow::event::Event;
//!
//! let caps: Caps = "audio/x-raw, rate=48000".parse().unwrap();
//! let event = Event::Caps(caps);
//! assert!(event.is_downstream());
//! assert!(event.is_serialized());
//! assert!(event.is_sticky());
//! assert!(!Event::FlushStart.is_serialized());
//! ```

mod query;

pub use query::{Query, SchedulingFlags};

use crate::caps::{Caps, Structure};
use crate::clock::ClockTime;
use bitflags::bitflags;

// ============================================================================
// Event Enum
// ============================================================================

/// Control signals that travel along pad links.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // ========== Downstream Events ==========
    /// Start of a new stream; precedes caps and data.
    StreamStart(StreamStartEvent),

    /// Format of the buffers that follow.
    Caps(Caps),

    /// Playback segment for the buffers that follow.
    Segment(SegmentEvent),

    /// No data for a period.
    Gap(GapEvent),

    /// No more data will follow.
    Eos,

    // ========== Upstream Events ==========
    /// Request to reposition the stream.
    Seek(SeekEvent),

    /// Ask upstream to renegotiate.
    Reconfigure,

    // ========== Bidirectional Events ==========
    /// Discard queued data and unblock waiting threads.
    FlushStart,

    /// Resume after a flush.
    FlushStop(FlushStopEvent),

    /// Application-defined event.
    Custom(CustomEvent),
}

impl Event {
    /// Check if this event may travel downstream.
    pub fn is_downstream(&self) -> bool {
        match self {
            Event::StreamStart(_)
            | Event::Caps(_)
            | Event::Segment(_)
            | Event::Gap(_)
            | Event::Eos
            | Event::FlushStart
            | Event::FlushStop(_) => true,
            Event::Seek(_) | Event::Reconfigure => false,
            Event::Custom(c) => c.downstream,
        }
    }

    /// Check if this event may travel upstream.
    pub fn is_upstream(&self) -> bool {
        match self {
            Event::Seek(_) | Event::Reconfigure | Event::FlushStart | Event::FlushStop(_) => true,
            Event::Custom(c) => !c.downstream,
            _ => false,
        }
    }

    /// Check if this event is ordered with buffers.
    pub fn is_serialized(&self) -> bool {
        match self {
            Event::FlushStart | Event::Seek(_) | Event::Reconfigure => false,
            Event::Custom(c) => c.serialized,
            _ => true,
        }
    }

    /// Check if a pad stores this event for replay to new peers.
    pub fn is_sticky(&self) -> bool {
        self.sticky_rank().is_some()
    }

    /// Replay order of sticky events; also identifies the sticky slot.
    pub(crate) fn sticky_rank(&self) -> Option<u8> {
        match self {
            Event::StreamStart(_) => Some(0),
            Event::Caps(_) => Some(1),
            Event::Segment(_) => Some(2),
            Event::Eos => Some(3),
            _ => None,
        }
    }

    /// Human-readable name of the event type.
    pub fn name(&self) -> &str {
        match self {
            Event::StreamStart(_) => "stream-start",
            Event::Caps(_) => "caps",
            Event::Segment(_) => "segment",
            Event::Gap(_) => "gap",
            Event::Eos => "eos",
            Event::Seek(_) => "seek",
            Event::Reconfigure => "reconfigure",
            Event::FlushStart => "flush-start",
            Event::FlushStop(_) => "flush-stop",
            Event::Custom(c) => c.structure.name(),
        }
    }
}

// ============================================================================
// Stream Start Event
// ============================================================================

/// Stream start event: establishes stream identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStartEvent {
    /// Unique stream identifier.
    pub stream_id: String,
    /// Optional group for streams that belong together.
    pub group_id: Option<u32>,
}

impl StreamStartEvent {
    /// Create a new stream start event.
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            group_id: None,
        }
    }

    /// Set the group id.
    pub fn with_group(mut self, group_id: u32) -> Self {
        self.group_id = Some(group_id);
        self
    }
}

// ============================================================================
// Segment Event
// ============================================================================

/// Unit of positions in segments, seeks and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Nanoseconds.
    #[default]
    Time,
    /// Bytes.
    Bytes,
}

/// Segment event: the timeline of the buffers that follow.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEvent {
    /// Unit of `start`, `stop` and `position`.
    pub format: Format,
    /// First position in the segment.
    pub start: u64,
    /// Last position, if bounded.
    pub stop: Option<u64>,
    /// Current position.
    pub position: u64,
    /// Playback rate (1.0 = normal speed).
    pub rate: f64,
    /// Running time accumulated by previous segments.
    pub base: u64,
}

impl SegmentEvent {
    /// Create a time segment.
    pub fn new_time(start: ClockTime, stop: Option<ClockTime>) -> Self {
        Self {
            format: Format::Time,
            start: start.nanos(),
            stop: stop.map(ClockTime::nanos),
            position: start.nanos(),
            rate: 1.0,
            base: 0,
        }
    }

    /// Create a byte segment.
    pub fn new_bytes(start: u64, stop: Option<u64>) -> Self {
        Self {
            format: Format::Bytes,
            start,
            stop,
            position: start,
            rate: 1.0,
            base: 0,
        }
    }

    /// Set the playback rate.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Running time of a timestamp inside a time segment. `None` outside
    /// the segment or for byte segments.
    pub fn to_running_time(&self, ts: ClockTime) -> Option<ClockTime> {
        if self.format != Format::Time || ts.nanos() < self.start {
            return None;
        }
        if self.stop.is_some_and(|stop| ts.nanos() > stop) {
            return None;
        }
        let offset = (ts.nanos() - self.start) as f64 / self.rate.abs();
        Some(ClockTime::from_nanos(self.base + offset as u64))
    }
}

impl Default for SegmentEvent {
    fn default() -> Self {
        Self::new_time(ClockTime::ZERO, None)
    }
}

// ============================================================================
// Gap Event
// ============================================================================

/// Gap event: no data for a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapEvent {
    /// Start of the gap.
    pub timestamp: ClockTime,
    /// Duration of the gap, if known.
    pub duration: Option<ClockTime>,
}

impl GapEvent {
    /// Create a new gap event.
    pub fn new(timestamp: ClockTime, duration: Option<ClockTime>) -> Self {
        Self {
            timestamp,
            duration,
        }
    }
}

// ============================================================================
// Seek Event
// ============================================================================

bitflags! {
    /// Flags for seek events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SeekFlags: u32 {
        /// Flush the pipeline before repositioning.
        const FLUSH = 1 << 0;
        /// Seek to the exact position.
        const ACCURATE = 1 << 1;
        /// Seek to the nearest keyframe.
        const KEY_UNIT = 1 << 2;
    }
}

impl Default for SeekFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Seek event: request upstream to jump to a position.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekEvent {
    /// Playback rate after the seek.
    pub rate: f64,
    /// Unit of `start` and `stop`.
    pub format: Format,
    /// Seek flags.
    pub flags: SeekFlags,
    /// New start position.
    pub start: u64,
    /// New stop position, if bounded.
    pub stop: Option<u64>,
}

impl SeekEvent {
    /// Flushing time seek to a position.
    pub fn new_time(position: ClockTime) -> Self {
        Self {
            rate: 1.0,
            format: Format::Time,
            flags: SeekFlags::FLUSH,
            start: position.nanos(),
            stop: None,
        }
    }

    /// Flushing byte seek to a position.
    pub fn new_bytes(position: u64) -> Self {
        Self {
            rate: 1.0,
            format: Format::Bytes,
            flags: SeekFlags::FLUSH,
            start: position,
            stop: None,
        }
    }

    /// Set seek flags.
    pub fn with_flags(mut self, flags: SeekFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the stop position.
    pub fn with_stop(mut self, stop: u64) -> Self {
        self.stop = Some(stop);
        self
    }
}

// ============================================================================
// Flush Stop Event
// ============================================================================

/// Flush stop event: resume normal operation after a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushStopEvent {
    /// Whether to reset running time to 0.
    pub reset_time: bool,
}

impl FlushStopEvent {
    /// Create a new flush stop event.
    pub fn new(reset_time: bool) -> Self {
        Self { reset_time }
    }
}

impl Default for FlushStopEvent {
    fn default() -> Self {
        Self { reset_time: true }
    }
}

// ============================================================================
// Custom Event
// ============================================================================

/// Application event carrying a structure as payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    /// Payload; its name is the event name.
    pub structure: Structure,
    /// Travels downstream (true) or upstream (false).
    pub downstream: bool,
    /// Ordered with buffers.
    pub serialized: bool,
}

impl CustomEvent {
    /// Serialized downstream event.
    pub fn downstream(structure: Structure) -> Self {
        Self {
            structure,
            downstream: true,
            serialized: true,
        }
    }

    /// Non-serialized upstream event.
    pub fn upstream(structure: Structure) -> Self {
        Self {
            structure,
            downstream: false,
            serialized: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_direction() {
        assert!(Event::Eos.is_downstream());
        assert!(!Event::Eos.is_upstream());
        assert!(Event::Seek(SeekEvent::new_time(ClockTime::ZERO)).is_upstream());
        assert!(Event::Reconfigure.is_upstream());
        assert!(Event::FlushStart.is_downstream() && Event::FlushStart.is_upstream());

        let custom = Event::Custom(CustomEvent::upstream(Structure::new("app/ping")));
        assert!(custom.is_upstream());
        assert_eq!(custom.name(), "app/ping");
    }

    #[test]
    fn test_event_serialization() {
        assert!(Event::Eos.is_serialized());
        assert!(Event::Segment(SegmentEvent::default()).is_serialized());
        assert!(Event::FlushStop(FlushStopEvent::default()).is_serialized());
        assert!(!Event::FlushStart.is_serialized());
    }

    #[test]
    fn test_sticky_order() {
        let ranks: Vec<_> = [
            Event::StreamStart(StreamStartEvent::new("s")),
            Event::Caps(Caps::new_any()),
            Event::Segment(SegmentEvent::default()),
            Event::Eos,
        ]
        .iter()
        .map(|e| e.sticky_rank().unwrap())
        .collect();
        assert!(ranks.windows(2).all(|w| w[0] < w[1]));
        assert!(!Event::FlushStart.is_sticky());
        assert!(!Event::Gap(GapEvent::new(ClockTime::ZERO, None)).is_sticky());
    }

    #[test]
    fn test_segment_running_time() {
        let mut seg =
            SegmentEvent::new_time(ClockTime::from_secs(10), Some(ClockTime::from_secs(60)));
        seg.base = ClockTime::from_secs(1).nanos();
        assert_eq!(
            seg.to_running_time(ClockTime::from_secs(12)),
            Some(ClockTime::from_secs(3))
        );
        assert_eq!(seg.to_running_time(ClockTime::from_secs(5)), None);
        assert_eq!(seg.to_running_time(ClockTime::from_secs(61)), None);
        assert_eq!(SegmentEvent::new_bytes(0, None).to_running_time(ClockTime::ZERO), None);
    }

    #[test]
    fn test_seek() {
        let seek = SeekEvent::new_bytes(100).with_stop(200);
        assert_eq!(seek.format, Format::Bytes);
        assert!(seek.flags.contains(SeekFlags::FLUSH));
        assert_eq!(seek.stop, Some(200));

        let keyframe = seek.with_flags(SeekFlags::FLUSH | SeekFlags::KEY_UNIT);
        assert!(keyframe.flags.contains(SeekFlags::KEY_UNIT));
        assert!(!keyframe.flags.contains(SeekFlags::ACCURATE));
        assert_eq!(SeekFlags::default(), SeekFlags::empty());
    }
}
