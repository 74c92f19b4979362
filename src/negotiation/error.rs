//! Negotiation error types.

use thiserror::Error;

/// Error during caps negotiation.
///
/// Negotiation failure is not a flow error by itself; the pad layer reports
/// it to the pushing caller as `FlowError::NotNegotiated`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// The template and the proposal share no format.
    #[error("no common format:\n  template: {template}\n  proposed: {proposed}")]
    NoCommonFormat {
        /// Caps the accepting side can handle.
        template: String,
        /// Caps that were offered.
        proposed: String,
    },

    /// The common caps cannot be collapsed to one format (e.g. both ANY).
    #[error("cannot fixate {caps}")]
    CannotFixate {
        /// The non-fixed intersection.
        caps: String,
    },

    /// A fixation hook returned caps that are still not fixed.
    #[error("fixation produced non-fixed caps {caps}")]
    NotFixed {
        /// The offending result.
        caps: String,
    },

    /// The pad refused caps it was asked to accept.
    #[error("pad {pad} refused caps {caps}")]
    Refused {
        /// Pad name.
        pad: String,
        /// Refused caps.
        caps: String,
    },
}

impl NegotiationError {
    /// Create a "no common format" error.
    pub fn no_common_format(template: &impl std::fmt::Display, proposed: &impl std::fmt::Display) -> Self {
        Self::NoCommonFormat {
            template: template.to_string(),
            proposed: proposed.to_string(),
        }
    }
}
