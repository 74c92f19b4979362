//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to create spans around pipeline state changes.
    pub pipeline_spans: bool,
    /// Whether to create spans around element state changes.
    pub element_spans: bool,
    /// Whether to emit a trace event per pushed buffer.
    pub buffer_spans: bool,
    /// Default span level.
    pub level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            pipeline_spans: true,
            element_spans: true,
            buffer_spans: false,
            level: Level::INFO,
        }
    }
}

impl TracingConfig {
    /// Enable every span and per-buffer event.
    pub fn all() -> Self {
        Self {
            pipeline_spans: true,
            element_spans: true,
            buffer_spans: true,
            level: Level::DEBUG,
        }
    }

    /// Pipeline spans only.
    pub fn minimal() -> Self {
        Self {
            pipeline_spans: true,
            element_spans: false,
            buffer_spans: false,
            level: Level::INFO,
        }
    }

    /// Disable all spans.
    pub fn none() -> Self {
        Self {
            pipeline_spans: false,
            element_spans: false,
            buffer_spans: false,
            level: Level::INFO,
        }
    }
}

/// Create a span for a pipeline.
///
/// # Example
///
/// ```rust
/// use padflow::observability::span_pipeline;
///
/// let span = span_pipeline("player");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_pipeline(name: &str) -> Span {
    span!(Level::INFO, "pipeline", name = %name)
}

/// Create a span for an element inside a pipeline.
#[inline]
pub fn span_element(pipeline: &str, element: &str) -> Span {
    span!(
        Level::DEBUG,
        "element",
        pipeline = %pipeline,
        element = %element
    )
}

/// Enter a pipeline span, or a disabled span if the config turns them off.
pub fn instrument_pipeline(config: &TracingConfig, name: &str) -> tracing::span::EnteredSpan {
    if config.pipeline_spans {
        span_pipeline(name).entered()
    } else {
        Span::none().entered()
    }
}

/// Enter an element span, or a disabled span if the config turns them off.
pub fn instrument_element(
    config: &TracingConfig,
    pipeline: &str,
    element: &str,
) -> tracing::span::EnteredSpan {
    if config.element_spans {
        span_element(pipeline, element).entered()
    } else {
        Span::none().entered()
    }
}

/// Log a state transition.
#[inline]
pub fn trace_state_change(element: &str, from: &str, to: &str) {
    tracing::debug!(
        element = %element,
        from = %from,
        to = %to,
        "state changed"
    );
}

/// Log end-of-stream reaching a sink.
#[inline]
pub fn trace_eos(element: &str) {
    tracing::debug!(element = %element, "end of stream");
}
