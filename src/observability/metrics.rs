//! Metrics collection using metrics-rs.

use metrics::{Counter, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const BUFFERS_PUSHED: &str = "padflow_buffers_pushed";
const BYTES_PUSHED: &str = "padflow_bytes_pushed";
const BUFFERS_PULLED: &str = "padflow_buffers_pulled";
const BUFFERS_DROPPED: &str = "padflow_buffers_dropped";
const FLOW_ERRORS: &str = "padflow_flow_errors";
const NEGOTIATIONS: &str = "padflow_negotiations";
const QUEUE_DEPTH: &str = "padflow_queue_depth";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        BUFFERS_PUSHED,
        Unit::Count,
        "Buffers accepted by a peer chain function"
    );
    metrics::describe_counter!(BYTES_PUSHED, Unit::Bytes, "Payload bytes pushed");
    metrics::describe_counter!(
        BUFFERS_PULLED,
        Unit::Count,
        "Buffers returned by a peer getrange function"
    );
    metrics::describe_counter!(
        BUFFERS_DROPPED,
        Unit::Count,
        "Buffers discarded by an element"
    );
    metrics::describe_counter!(
        FLOW_ERRORS,
        Unit::Count,
        "Non-OK flow returns, labelled by kind"
    );
    metrics::describe_counter!(
        NEGOTIATIONS,
        Unit::Count,
        "Caps negotiations, labelled by outcome"
    );
    metrics::describe_gauge!(QUEUE_DEPTH, Unit::Count, "Buffers held by a queue");
}

/// Record a non-OK flow return.
#[inline]
pub fn record_flow_error(kind: &'static str) {
    counter!(FLOW_ERRORS, "kind" => kind).increment(1);
}

/// Record the outcome of a caps negotiation.
#[inline]
pub fn record_negotiation(success: bool) {
    let outcome = if success { "fixed" } else { "failed" };
    counter!(NEGOTIATIONS, "outcome" => outcome).increment(1);
}

/// Record a buffer discarded by an element.
#[inline]
pub fn record_buffer_dropped(element: &str) {
    counter!(BUFFERS_DROPPED, "element" => element.to_string()).increment(1);
}

/// Record the fill level of a queue.
#[inline]
pub fn record_queue_depth(queue: &str, depth: usize) {
    gauge!(QUEUE_DEPTH, "queue" => queue.to_string()).set(depth as f64);
}

/// Counters bound to one pad.
///
/// Handles are resolved once when the pad is created so that the data path
/// does not allocate label strings per buffer.
#[derive(Clone)]
pub struct PadMetrics {
    pad: String,
    buffers_pushed: Counter,
    bytes_pushed: Counter,
    buffers_pulled: Counter,
}

impl PadMetrics {
    /// Create a metrics collector for the named pad.
    pub fn new(pad: &str) -> Self {
        Self {
            pad: pad.to_string(),
            buffers_pushed: counter!(BUFFERS_PUSHED, "pad" => pad.to_string()),
            bytes_pushed: counter!(BYTES_PUSHED, "pad" => pad.to_string()),
            buffers_pulled: counter!(BUFFERS_PULLED, "pad" => pad.to_string()),
        }
    }

    /// Record a buffer accepted downstream.
    #[inline]
    pub fn record_push(&self, bytes: usize) {
        self.buffers_pushed.increment(1);
        self.bytes_pushed.increment(bytes as u64);
    }

    /// Record a buffer returned by a pull.
    #[inline]
    pub fn record_pull(&self) {
        self.buffers_pulled.increment(1);
    }

    /// Get the pad name.
    pub fn pad(&self) -> &str {
        &self.pad
    }
}

impl std::fmt::Debug for PadMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PadMetrics").field("pad", &self.pad).finish()
    }
}
