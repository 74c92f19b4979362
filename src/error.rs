//! Error types for padflow.
//!
//! Control-plane operations (linking, activation, state changes, caps
//! parsing) return [`Error`]. The data plane does not: pushes and pulls
//! return a [`FlowResult`](crate::flow::FlowResult) so that the hot path
//! never carries rich diagnostics.

use crate::element::{PadLinkError, State, StateChange};
use crate::negotiation::NegotiationError;
use thiserror::Error;

/// Result type alias using padflow's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for padflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Memory allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Two pads could not be linked.
    #[error("pad link failed: {0}")]
    Link(#[from] PadLinkError),

    /// A pad could not be activated or deactivated.
    #[error("failed to {action} pad {pad}: {reason}")]
    Activation {
        /// Name of the pad.
        pad: String,
        /// "activate" or "deactivate".
        action: &'static str,
        /// Why it failed.
        reason: String,
    },

    /// Caps negotiation failed.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// An element refused a state transition.
    #[error("element {element} failed state change {transition} (stayed in {state})")]
    StateChange {
        /// Name of the element.
        element: String,
        /// The refused transition.
        transition: StateChange,
        /// The last state the element reached.
        state: State,
    },

    /// A caps description could not be parsed.
    #[error("invalid caps description {input:?}: {reason}")]
    CapsParse {
        /// The offending input.
        input: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// Element-specific failure.
    #[error("element error: {0}")]
    Element(String),
}
