//! Buffer metadata types.

use crate::clock::ClockTime;
use bitflags::bitflags;

bitflags! {
    /// Flags describing buffer properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        /// Data is not contiguous with the previous buffer on the same pad.
        const DISCONT = 1 << 0;
        /// Memory cannot be written in place; writers always copy.
        const READONLY = 1 << 1;
        /// Not a keyframe: cannot be decoded on its own.
        const DELTA_UNIT = 1 << 2;
        /// Buffer fills a gap in the stream and carries no meaningful data.
        const GAP = 1 << 3;
        /// Buffer contains stream headers.
        const HEADER = 1 << 4;
        /// Buffer may be dropped without affecting later buffers.
        const DROPPABLE = 1 << 5;
        /// Format-specific marker (e.g. end of frame).
        const MARKER = 1 << 6;
    }
}

impl Default for BufferFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Scalar metadata attached to a buffer.
///
/// Every timing field is optional: a buffer may legitimately have no
/// timestamp or no duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Presentation timestamp.
    pub pts: Option<ClockTime>,
    /// Decode timestamp.
    pub dts: Option<ClockTime>,
    /// Duration of the content.
    pub duration: Option<ClockTime>,
    /// Media-specific offset (byte offset, frame number).
    pub offset: Option<u64>,
    /// Media-specific end offset.
    pub offset_end: Option<u64>,
    /// Buffer flags.
    pub flags: BufferFlags,
}

impl Metadata {
    /// Create metadata with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: ClockTime) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Set the decode timestamp.
    pub fn with_dts(mut self, dts: ClockTime) -> Self {
        self.dts = Some(dts);
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: ClockTime) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the offset pair.
    pub fn with_offsets(mut self, offset: u64, offset_end: u64) -> Self {
        self.offset = Some(offset);
        self.offset_end = Some(offset_end);
        self
    }

    /// Set flags.
    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags = flags;
        self
    }

    /// End time (`pts + duration`) if both are known.
    pub fn end_time(&self) -> Option<ClockTime> {
        self.pts?.checked_add(self.duration?)
    }

    /// Check if the DISCONT flag is set.
    pub fn is_discont(&self) -> bool {
        self.flags.contains(BufferFlags::DISCONT)
    }
}
