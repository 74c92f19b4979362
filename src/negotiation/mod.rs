//! Caps negotiation between two connected pads.
//!
//! ```text
//! template ∩ proposed ──empty──▶ NoCommonFormat
//!        │
//!        ▼
//!    fixed? ──no──▶ fixate ──▶ fixed? ──no──▶ NotFixed
//!        │                        │
//!        └────────yes─────────────┴──▶ accepted caps
//! ```
//!
//! # Example
//!
//! ```rust
//! use padflow::caps::Caps;
//! use padflow::negotiation::negotiate;
//!
//! let template: Caps = "video/x-raw, format=A, width=[1, 100]".parse().unwrap();
//! let proposed: Caps = "video/x-raw, format=A, width=50".parse().unwrap();
//!
//! let accepted = negotiate(&template, &proposed).unwrap();
//! assert!(accepted.is_fixed());
//! assert_eq!(accepted.to_string(), "video/x-raw, format=(string)A, width=(int)50");
//! ```

mod error;

pub use error::NegotiationError;

use crate::caps::Caps;
use crate::observability::record_negotiation;

/// Negotiate using the default fixation.
pub fn negotiate(template: &Caps, proposed: &Caps) -> Result<Caps, NegotiationError> {
    negotiate_with(template, proposed, |caps| caps.fixate())
}

/// Negotiate with a custom fixation step.
///
/// `fixate` is only called when the intersection is not already fixed. Its
/// result must be fixed, and must still be a subset of the intersection,
/// otherwise negotiation fails.
pub fn negotiate_with<F>(
    template: &Caps,
    proposed: &Caps,
    fixate: F,
) -> Result<Caps, NegotiationError>
where
    F: FnOnce(&Caps) -> Option<Caps>,
{
    let result = run(template, proposed, fixate);
    record_negotiation(result.is_ok());
    match &result {
        Ok(caps) => tracing::debug!(%caps, "negotiated"),
        Err(err) => tracing::debug!(%err, "negotiation failed"),
    }
    result
}

fn run<F>(template: &Caps, proposed: &Caps, fixate: F) -> Result<Caps, NegotiationError>
where
    F: FnOnce(&Caps) -> Option<Caps>,
{
    let common = template.intersect(proposed);
    if common.is_empty() {
        return Err(NegotiationError::no_common_format(template, proposed));
    }
    if common.is_fixed() {
        return Ok(common);
    }

    let fixed = fixate(&common).ok_or_else(|| NegotiationError::CannotFixate {
        caps: common.to_string(),
    })?;
    if !fixed.is_fixed() || !fixed.is_subset(&common) {
        return Err(NegotiationError::NotFixed {
            caps: fixed.to_string(),
        });
    }
    Ok(fixed)
}

/// Check whether `caps` can be accepted as-is by a pad with `template`:
/// they must be fixed and describe a subset of the template.
pub fn accepts(template: &Caps, caps: &Caps) -> bool {
    caps.is_fixed() && caps.is_subset(template)
}
