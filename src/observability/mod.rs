//! Observability features: metrics and tracing.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `padflow_buffers_pushed` | Counter | Buffers accepted by a peer chain function |
//! | `padflow_bytes_pushed` | Counter | Payload bytes pushed |
//! | `padflow_buffers_pulled` | Counter | Buffers returned by a getrange function |
//! | `padflow_buffers_dropped` | Counter | Buffers discarded by an element |
//! | `padflow_flow_errors` | Counter | Non-OK flow returns, by kind |
//! | `padflow_negotiations` | Counter | Caps negotiations, by outcome |
//! | `padflow_queue_depth` | Gauge | Buffers held by a queue |
//!
//! No recorder is installed by this crate; without one every call is a
//! no-op. [`init_metrics`] only registers descriptions.
//!
//! ## Tracing
//!
//! Pads log links, activation and negotiation at `debug`, every buffer at
//! `trace`. Refused events and sticky flow errors are `warn`; errors posted
//! to a bus are `error`. Flushing, not-linked and EOS returns are never
//! logged above `debug`.

mod metrics;
mod tracing_support;

pub use metrics::{
    PadMetrics, init_metrics, record_buffer_dropped, record_flow_error, record_negotiation,
    record_queue_depth,
};
pub use tracing_support::{
    TracingConfig, instrument_element, instrument_pipeline, span_element, span_pipeline,
    trace_eos, trace_state_change,
};
