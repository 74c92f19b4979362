//! Reference-counted buffers.
//!
//! A [`Buffer`] is a handle to a shared, immutable-while-shared region of
//! bytes plus its [`Metadata`]. Cloning a handle is the `ref` operation and
//! dropping it is the `unref` operation; the backing store is freed when the
//! last handle goes away.
//!
//! Mutation is only possible through accessors that check for exclusive
//! ownership (`data_mut`, `meta_mut`) or that copy first (`make_writable`,
//! `make_data_mut`). There is no way to obtain `&mut` access to bytes that
//! another handle can observe.

use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::error::{Error, Result};
use crate::metadata::{BufferFlags, Metadata};
use std::sync::Arc;

/// Backing allocation of a buffer.
#[derive(Clone)]
enum Memory {
    /// Heap allocation owned by the buffer.
    Owned(Box<[u8]>),
    /// Static data that is never written in place.
    Static(&'static [u8]),
}

impl Memory {
    fn as_slice(&self) -> &[u8] {
        match self {
            Memory::Owned(data) => data,
            Memory::Static(data) => data,
        }
    }

    fn capacity(&self) -> usize {
        self.as_slice().len()
    }

    fn is_readonly(&self) -> bool {
        matches!(self, Memory::Static(_))
    }
}

#[derive(Clone)]
struct BufferInner {
    memory: Memory,
    /// Start of the logical view within `memory`.
    offset: usize,
    /// Length of the logical view.
    size: usize,
    metadata: Metadata,
    caps: Option<Caps>,
}

/// A reference-counted chunk of payload bytes with timing metadata.
///
/// # Example
///
/// ```rust
/// use padflow::buffer::Buffer;
/// use padflow::clock::ClockTime;
///
/// let mut buffer = Buffer::from_slice(b"abcd");
/// buffer.meta_mut().unwrap().pts = Some(ClockTime::from_secs(1));
///
/// let shared = buffer.clone();
/// assert_eq!(buffer.ref_count(), 2);
/// assert!(buffer.data_mut().is_none());
///
/// let mut writable = shared.make_writable();
/// writable.data_mut().unwrap()[0] = b'x';
/// assert_eq!(buffer.as_bytes(), b"abcd");
/// ```
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Allocate a zero-filled, exclusively owned buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the allocator cannot provide
    /// the memory.
    pub fn allocate(size: usize) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| Error::AllocationFailed(format!("{size} bytes: {e}")))?;
        data.resize(size, 0);
        Ok(Self::from_vec(data))
    }

    /// Wrap an owned vector without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let size = data.len();
        Self::from_memory(Memory::Owned(data.into_boxed_slice()), size)
    }

    /// Copy a byte slice into a new buffer.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Wrap static data. The buffer is flagged READONLY and writers always
    /// copy.
    pub fn from_static(data: &'static [u8]) -> Self {
        let mut buffer = Self::from_memory(Memory::Static(data), data.len());
        if let Some(meta) = buffer.meta_mut() {
            meta.flags.insert(BufferFlags::READONLY);
        }
        buffer
    }

    fn from_memory(memory: Memory, size: usize) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                memory,
                offset: 0,
                size,
                metadata: Metadata::default(),
                caps: None,
            }),
        }
    }

    /// Builder-style metadata setter for freshly created buffers.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is shared.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        let readonly = self.inner.memory.is_readonly();
        let meta = self
            .meta_mut()
            .expect("with_metadata called on a shared buffer");
        *meta = metadata;
        meta.flags.set(BufferFlags::READONLY, readonly);
        self
    }

    /// Builder-style caps setter for freshly created buffers.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is shared.
    pub fn with_caps(mut self, caps: Caps) -> Self {
        assert!(self.set_caps(Some(caps)), "with_caps called on a shared buffer");
        self
    }

    /// Number of live handles to this buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// True if this handle is the only one, so metadata and view may change.
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// True if both handles refer to the same underlying buffer.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Logical size in bytes.
    pub fn len(&self) -> usize {
        self.inner.size
    }

    /// Check if the logical view is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.size == 0
    }

    /// Size of the backing allocation; the upper bound for [`resize`](Self::resize).
    pub fn capacity(&self) -> usize {
        self.inner.memory.capacity()
    }

    /// Read-only view of the payload.
    pub fn as_bytes(&self) -> &[u8] {
        let inner = &*self.inner;
        &inner.memory.as_slice()[inner.offset..inner.offset + inner.size]
    }

    /// Buffer metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    /// Presentation timestamp, if any.
    pub fn pts(&self) -> Option<ClockTime> {
        self.inner.metadata.pts
    }

    /// Duration, if any.
    pub fn duration(&self) -> Option<ClockTime> {
        self.inner.metadata.duration
    }

    /// Buffer flags.
    pub fn flags(&self) -> BufferFlags {
        self.inner.metadata.flags
    }

    /// Caps describing the content at creation time, if recorded.
    pub fn caps(&self) -> Option<&Caps> {
        self.inner.caps.as_ref()
    }

    /// Mutable metadata, only when this handle is exclusive.
    pub fn meta_mut(&mut self) -> Option<&mut Metadata> {
        Arc::get_mut(&mut self.inner).map(|inner| &mut inner.metadata)
    }

    /// Replace the caps back-reference. Returns false if the buffer is shared.
    pub fn set_caps(&mut self, caps: Option<Caps>) -> bool {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                inner.caps = caps;
                true
            }
            None => false,
        }
    }

    /// Mutable payload, only when this handle is exclusive and the memory
    /// is not read-only.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        let inner = Arc::get_mut(&mut self.inner)?;
        match &mut inner.memory {
            Memory::Owned(data) => Some(&mut data[inner.offset..inner.offset + inner.size]),
            Memory::Static(_) => None,
        }
    }

    /// Mutable payload, copying first if the buffer is shared or read-only.
    ///
    /// Other handles never observe the write.
    pub fn make_data_mut(&mut self) -> &mut [u8] {
        if !self.is_writable() || self.inner.memory.is_readonly() {
            *self = self.deep_copy();
        }
        let inner = Arc::get_mut(&mut self.inner).expect("deep copy is exclusive");
        match &mut inner.memory {
            Memory::Owned(data) => &mut data[inner.offset..inner.offset + inner.size],
            Memory::Static(_) => unreachable!("deep copy always owns its memory"),
        }
    }

    /// Return `self` if exclusively owned, otherwise an exclusive deep copy.
    ///
    /// The shared instance is never modified.
    pub fn make_writable(self) -> Buffer {
        if self.is_writable() {
            self
        } else {
            self.deep_copy()
        }
    }

    /// Copy the logical view and all metadata into a fresh allocation.
    pub fn deep_copy(&self) -> Buffer {
        let mut copy = self.copy_region(0, self.len());
        if let Some(meta) = copy.meta_mut() {
            meta.flags.remove(BufferFlags::READONLY);
        }
        copy
    }

    /// Adjust the logical view in place.
    ///
    /// `offset` moves the start of the view relative to its current start
    /// (negative values grow it back towards the start of the allocation),
    /// `new_size` is the size of the resulting view.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is shared or if the requested window does not
    /// fit inside the backing allocation. Neither is clamped.
    pub fn resize(&mut self, offset: isize, new_size: usize) {
        let capacity = self.capacity();
        let inner = Arc::get_mut(&mut self.inner).expect("resize on a shared buffer");
        let start = inner.offset as isize + offset;
        assert!(
            start >= 0 && (start as usize).saturating_add(new_size) <= capacity,
            "resize window [{start}, {start}+{new_size}) exceeds allocation of {capacity} bytes"
        );
        inner.offset = start as usize;
        inner.size = new_size;
    }

    /// Shrink or grow the view, keeping its start.
    ///
    /// # Panics
    ///
    /// See [`resize`](Self::resize).
    pub fn set_size(&mut self, new_size: usize) {
        self.resize(0, new_size);
    }

    /// Copy `size` bytes starting at `offset` into an independent buffer.
    ///
    /// Timing metadata (timestamps, duration, offsets) is only copied when
    /// the region covers the whole buffer. A partial copy keeps the flags
    /// except READONLY, and keeps DISCONT only when it starts at 0.
    ///
    /// # Panics
    ///
    /// Panics if the region is outside the buffer.
    pub fn copy_region(&self, offset: usize, size: usize) -> Buffer {
        assert!(
            offset.saturating_add(size) <= self.len(),
            "copy region [{offset}, {offset}+{size}) exceeds buffer of {} bytes",
            self.len()
        );
        let data = self.as_bytes()[offset..offset + size].to_vec();
        let source = self.metadata();

        let mut metadata = if offset == 0 && size == self.len() {
            *source
        } else {
            let mut partial = Metadata::new().with_flags(source.flags);
            if offset != 0 {
                partial.flags.remove(BufferFlags::DISCONT);
            }
            partial
        };
        metadata.flags.remove(BufferFlags::READONLY);

        let mut copy = Buffer::from_vec(data).with_metadata(metadata);
        copy.set_caps(self.caps().cloned());
        copy
    }

    /// Concatenate two buffers.
    ///
    /// The result takes its timestamps and flags from `self`; the duration
    /// is the sum when both are known and the end offset comes from `other`.
    pub fn append(self, other: Buffer) -> Buffer {
        let mut data = Vec::with_capacity(self.len() + other.len());
        data.extend_from_slice(self.as_bytes());
        data.extend_from_slice(other.as_bytes());

        let mut metadata = *self.metadata();
        metadata.flags.remove(BufferFlags::READONLY);
        metadata.duration = match (self.duration(), other.duration()) {
            (Some(a), Some(b)) => a.checked_add(b),
            _ => None,
        };
        metadata.offset_end = other.metadata().offset_end;

        let mut merged = Buffer::from_vec(data).with_metadata(metadata);
        merged.set_caps(self.caps().cloned());
        merged
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.len())
            .field("capacity", &self.capacity())
            .field("refs", &self.ref_count())
            .field("metadata", self.metadata())
            .finish()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Buffer::from_vec(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_buffer() -> Buffer {
        Buffer::from_slice(&[1, 2, 3, 4]).with_metadata(
            Metadata::new()
                .with_pts(ClockTime::from_secs(1))
                .with_flags(BufferFlags::DISCONT),
        )
    }

    #[test]
    fn test_allocate_is_zeroed_and_exclusive() {
        let buffer = Buffer::allocate(16).unwrap();
        assert_eq!(buffer.len(), 16);
        assert_eq!(buffer.capacity(), 16);
        assert!(buffer.as_bytes().iter().all(|&b| b == 0));
        assert!(buffer.is_writable());
    }

    #[test]
    fn test_ref_unref_keeps_state() {
        let buffer = make_test_buffer();
        let before = (buffer.len(), buffer.as_bytes().to_vec(), *buffer.metadata());

        let extra = buffer.clone();
        assert_eq!(buffer.ref_count(), 2);
        drop(extra);

        assert_eq!(buffer.ref_count(), 1);
        assert_eq!(
            (buffer.len(), buffer.as_bytes().to_vec(), *buffer.metadata()),
            before
        );
    }

    #[test]
    fn test_shared_buffer_is_immutable() {
        let mut buffer = make_test_buffer();
        let other = buffer.clone();
        assert!(buffer.data_mut().is_none());
        assert!(buffer.meta_mut().is_none());
        drop(other);
        assert!(buffer.data_mut().is_some());
    }

    #[test]
    fn test_make_writable_exclusive_is_identity() {
        let buffer = make_test_buffer();
        let ptr = buffer.as_bytes().as_ptr();
        let writable = buffer.make_writable();
        assert_eq!(writable.as_bytes().as_ptr(), ptr);
    }

    #[test]
    fn test_make_writable_shared_copies() {
        let original = make_test_buffer();
        let mut writable = original.clone().make_writable();
        assert!(!writable.ptr_eq(&original));
        assert_eq!(writable.ref_count(), 1);
        assert_eq!(writable.pts(), original.pts());

        writable.data_mut().unwrap()[0] = 9;
        assert_eq!(original.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(writable.as_bytes(), &[9, 2, 3, 4]);
    }

    #[test]
    fn test_make_data_mut_on_shared() {
        let original = make_test_buffer();
        let mut copy = original.clone();
        copy.make_data_mut()[3] = 7;
        assert_eq!(original.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(copy.as_bytes(), &[1, 2, 3, 7]);
    }

    #[test]
    fn test_static_buffer_copies_on_write() {
        static DATA: [u8; 3] = [5, 6, 7];
        let mut buffer = Buffer::from_static(&DATA);
        assert!(buffer.flags().contains(BufferFlags::READONLY));
        assert!(buffer.data_mut().is_none());

        buffer.make_data_mut()[0] = 1;
        assert_eq!(buffer.as_bytes(), &[1, 6, 7]);
        assert!(!buffer.flags().contains(BufferFlags::READONLY));
        assert_eq!(DATA, [5, 6, 7]);
    }

    #[test]
    fn test_resize_within_allocation() {
        let mut buffer = Buffer::from_slice(&[0, 1, 2, 3, 4, 5, 6, 7]);
        buffer.resize(2, 4);
        assert_eq!(buffer.as_bytes(), &[2, 3, 4, 5]);

        buffer.resize(-2, 8);
        assert_eq!(buffer.as_bytes(), &[0, 1, 2, 3, 4, 5, 6, 7]);

        buffer.set_size(3);
        assert_eq!(buffer.as_bytes(), &[0, 1, 2]);
        assert_eq!(buffer.capacity(), 8);
    }

    #[test]
    #[should_panic(expected = "exceeds allocation")]
    fn test_resize_beyond_allocation_panics() {
        let mut buffer = Buffer::from_slice(&[0; 8]);
        buffer.resize(4, 8);
    }

    #[test]
    #[should_panic(expected = "resize on a shared buffer")]
    fn test_resize_shared_panics() {
        let mut buffer = Buffer::from_slice(&[0; 8]);
        let _other = buffer.clone();
        buffer.set_size(4);
    }

    #[test]
    fn test_copy_region_whole_keeps_timing() {
        let buffer = make_test_buffer();
        let copy = buffer.copy_region(0, 4);
        assert_eq!(copy.pts(), Some(ClockTime::from_secs(1)));
        assert!(copy.metadata().is_discont());
        assert!(!copy.ptr_eq(&buffer));
    }

    #[test]
    fn test_copy_region_partial_drops_timing() {
        let buffer = make_test_buffer();

        let head = buffer.copy_region(0, 2);
        assert_eq!(head.as_bytes(), &[1, 2]);
        assert_eq!(head.pts(), None);
        assert!(head.metadata().is_discont());

        let tail = buffer.copy_region(2, 2);
        assert_eq!(tail.as_bytes(), &[3, 4]);
        assert_eq!(tail.pts(), None);
        assert!(!tail.metadata().is_discont());
    }

    #[test]
    #[should_panic(expected = "exceeds buffer")]
    fn test_copy_region_out_of_bounds_panics() {
        let _ = make_test_buffer().copy_region(3, 2);
    }

    #[test]
    fn test_append() {
        let a = Buffer::from_slice(b"ab").with_metadata(
            Metadata::new()
                .with_pts(ClockTime::from_secs(1))
                .with_duration(ClockTime::from_secs(1)),
        );
        let b = Buffer::from_slice(b"cd").with_metadata(
            Metadata::new()
                .with_pts(ClockTime::from_secs(2))
                .with_duration(ClockTime::from_secs(2)),
        );
        let merged = a.append(b);
        assert_eq!(merged.as_bytes(), b"abcd");
        assert_eq!(merged.pts(), Some(ClockTime::from_secs(1)));
        assert_eq!(merged.duration(), Some(ClockTime::from_secs(3)));
    }
}
