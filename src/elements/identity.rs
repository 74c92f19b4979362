//! Identity: a pass-through element with statistics and test hooks.
//!
//! Buffers are counted as *in* when the chain function is entered, as
//! *out* when the downstream push succeeded and as *dropped* when this
//! element discarded them. A buffer refused downstream counts as *in*
//! only, so `in == out + dropped + refused` at all times.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{DefaultElementImpl, Element, Pad, PadTemplate};
use crate::flow::{FlowError, FlowSuccess};
use crate::observability::record_buffer_dropped;
use crate::sync::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Callback type for buffer inspection.
pub type BufferCallback = Box<dyn Fn(&Buffer) + Send + Sync>;

/// Predicate selecting buffers to drop.
pub type DropFilter = Box<dyn Fn(&Buffer) -> bool + Send + Sync>;

#[derive(Default)]
struct Counters {
    buffers_in: AtomicU64,
    buffers_out: AtomicU64,
    dropped: AtomicU64,
    refused: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Default)]
struct Hooks {
    callback: Option<Arc<BufferCallback>>,
    drop_filter: Option<Arc<DropFilter>>,
    error_after: Option<u64>,
}

struct IdentityShared {
    counters: Counters,
    hooks: Mutex<Hooks>,
}

/// A pass-through element.
///
/// Events and queries are forwarded through internal links; caps queries
/// are answered by the opposite side.
///
/// ```rust
/// use padflow::elements::Identity;
///
/// let identity = Identity::new("tap").on_buffer(|buf| {
///     tracing::info!(len = buf.len(), "buffer");
/// });
/// assert_eq!(identity.stats().buffers_in, 0);
/// ```
pub struct Identity {
    element: Element,
    shared: Arc<IdentityShared>,
}

impl Identity {
    /// Create an identity element with `sink` and `src` pads.
    pub fn new(name: impl Into<String>) -> Self {
        let shared = Arc::new(IdentityShared {
            counters: Counters::default(),
            hooks: Mutex::new(Hooks::default()),
        });
        let name = name.into();

        let src = Pad::builder_from_template(&PadTemplate::src(Caps::new_any()), "src")
            .proxy_caps(true)
            .build();
        let sink = {
            let shared = Arc::clone(&shared);
            let src = src.clone();
            let element_name = name.clone();
            Pad::builder_from_template(&PadTemplate::sink(Caps::new_any()), "sink")
                .proxy_caps(true)
                .chain_function(move |pad, buffer| {
                    shared.chain(pad, &src, &element_name, buffer)
                })
                .build()
        };
        sink.set_internal_links(std::slice::from_ref(&src));
        src.set_internal_links(std::slice::from_ref(&sink));

        let element = Element::new(name, DefaultElementImpl);
        for pad in [&sink, &src] {
            if let Err(e) = element.add_pad(pad) {
                tracing::error!(error = %e, "identity pad setup failed");
            }
        }
        Self { element, shared }
    }

    /// Call `callback` for every incoming buffer.
    pub fn on_buffer<F>(self, callback: F) -> Self
    where
        F: Fn(&Buffer) + Send + Sync + 'static,
    {
        lock(&self.shared.hooks).callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Drop buffers matching `filter` instead of forwarding them.
    pub fn with_drop_filter<F>(self, filter: F) -> Self
    where
        F: Fn(&Buffer) -> bool + Send + Sync + 'static,
    {
        lock(&self.shared.hooks).drop_filter = Some(Arc::new(Box::new(filter)));
        self
    }

    /// Fail with `Error` once `count` buffers went through.
    pub fn with_error_after(self, count: u64) -> Self {
        lock(&self.shared.hooks).error_after = Some(count);
        self
    }

    /// The element.
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> IdentityStats {
        let c = &self.shared.counters;
        IdentityStats {
            buffers_in: c.buffers_in.load(Ordering::Relaxed),
            buffers_out: c.buffers_out.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            refused: c.refused.load(Ordering::Relaxed),
            bytes: c.bytes.load(Ordering::Relaxed),
        }
    }

    /// Reset statistics.
    pub fn reset_stats(&self) {
        let c = &self.shared.counters;
        for counter in [
            &c.buffers_in,
            &c.buffers_out,
            &c.dropped,
            &c.refused,
            &c.bytes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl IdentityShared {
    fn chain(
        &self,
        pad: &Pad,
        src: &Pad,
        element: &str,
        buffer: Buffer,
    ) -> crate::flow::FlowResult {
        let c = &self.counters;
        let seen = c.buffers_in.fetch_add(1, Ordering::Relaxed) + 1;
        c.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);

        let (callback, drop_filter, error_after) = {
            let hooks = lock(&self.hooks);
            (
                hooks.callback.clone(),
                hooks.drop_filter.clone(),
                hooks.error_after,
            )
        };
        if let Some(cb) = callback {
            cb(&buffer);
        }

        if error_after.is_some_and(|limit| seen > limit) {
            c.refused.fetch_add(1, Ordering::Relaxed);
            if let Some(parent) = pad.parent_element() {
                parent.post_error(format!("failed after {} buffers", seen - 1), None);
            }
            return Err(FlowError::Error);
        }

        if drop_filter.is_some_and(|f| f(&buffer)) {
            trace!(element, pts = ?buffer.pts(), "dropping buffer");
            c.dropped.fetch_add(1, Ordering::Relaxed);
            record_buffer_dropped(element);
            return Ok(FlowSuccess::Ok);
        }

        let result = src.push(buffer);
        match result {
            Ok(_) => c.buffers_out.fetch_add(1, Ordering::Relaxed),
            Err(_) => c.refused.fetch_add(1, Ordering::Relaxed),
        };
        result
    }
}

/// Statistics for [`Identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdentityStats {
    /// Buffers that entered the chain function.
    pub buffers_in: u64,
    /// Buffers pushed downstream successfully.
    pub buffers_out: u64,
    /// Buffers discarded by this element.
    pub dropped: u64,
    /// Buffers that failed, here or downstream.
    pub refused: u64,
    /// Payload bytes that entered.
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{PadDirection, State};
    use crate::event::{Event, StreamStartEvent};
    use std::sync::atomic::AtomicUsize;

    fn downstream(result: crate::flow::FlowResult) -> (Pad, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let pad = Pad::builder("in", PadDirection::Sink)
            .chain_function(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                result
            })
            .build();
        (pad, count)
    }

    fn wire(identity: &Identity, sink: &Pad) -> Pad {
        let upstream = Pad::builder("out", PadDirection::Src).build();
        upstream.link(&identity.element().pad("sink").unwrap()).unwrap();
        identity.element().pad("src").unwrap().link(sink).unwrap();
        identity.element().set_state(State::Paused).unwrap();
        sink.set_active(true).unwrap();
        upstream.set_active(true).unwrap();
        assert!(upstream.push_event(Event::StreamStart(StreamStartEvent::new("s"))));
        assert!(upstream.push_event(Event::Caps("test/data".parse().unwrap())));
        upstream
    }

    #[test]
    fn test_passthrough_counts() {
        let identity = Identity::new("id");
        let (sink, count) = downstream(Ok(FlowSuccess::Ok));
        let upstream = wire(&identity, &sink);

        for i in 0..3u8 {
            assert!(upstream.push(Buffer::from_vec(vec![i; 10])).is_ok());
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);
        let stats = identity.stats();
        assert_eq!(stats.buffers_in, 3);
        assert_eq!(stats.buffers_out, 3);
        assert_eq!(stats.bytes, 30);
        assert_eq!(sink.caps().unwrap().to_string(), "test/data");
    }

    #[test]
    fn test_drop_filter_counts_dropped() {
        let identity = Identity::new("id").with_drop_filter(|b| b.len() < 5);
        let (sink, count) = downstream(Ok(FlowSuccess::Ok));
        let upstream = wire(&identity, &sink);

        upstream.push(Buffer::from_vec(vec![0; 2])).unwrap();
        upstream.push(Buffer::from_vec(vec![0; 8])).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let stats = identity.stats();
        assert_eq!(stats.buffers_in, 2);
        assert_eq!(stats.buffers_out + stats.dropped, 2);
    }

    #[test]
    fn test_refused_downstream_counts_in_only() {
        let identity = Identity::new("id");
        let (sink, _) = downstream(Err(FlowError::Error));
        let upstream = wire(&identity, &sink);

        assert_eq!(
            upstream.push(Buffer::from_vec(vec![1])),
            Err(FlowError::Error)
        );
        let stats = identity.stats();
        assert_eq!((stats.buffers_in, stats.buffers_out, stats.refused), (1, 0, 1));
    }

    #[test]
    fn test_error_after() {
        let identity = Identity::new("id").with_error_after(1);
        let (sink, _) = downstream(Ok(FlowSuccess::Ok));
        let upstream = wire(&identity, &sink);
        assert!(upstream.push(Buffer::from_vec(vec![1])).is_ok());
        assert_eq!(
            upstream.push(Buffer::from_vec(vec![2])),
            Err(FlowError::Error)
        );
    }
}
