//! The behaviour interface elements implement.

use super::instance::Element;
use super::state::{StateChange, StateChangeError, StateChangeSuccess};
use crate::event::Event;
use crate::pipeline::Message;

/// Element-specific behaviour, stored inside an [`Element`].
///
/// Every method has a default that does the generic thing, so simple
/// elements only override what they need. Data-plane behaviour lives in
/// the pad hooks, not here.
///
/// # State changes
///
/// An override of [`change_state`](Self::change_state) must call
/// [`Element::parent_change_state`] for the same transition: *after* its
/// own setup on the way up, and *before* its own teardown on the way down.
/// That way resources exist before pads are activated and are only freed
/// once pads are deactivated and streaming threads have stopped.
///
/// ```rust
/// use padflow::element::{Element, ElementImpl, StateChange, StateChangeError, StateChangeSuccess};
///
/// struct Device;
///
/// impl ElementImpl for Device {
///     fn change_state(
///         &self,
///         element: &Element,
///         transition: StateChange,
///     ) -> Result<StateChangeSuccess, StateChangeError> {
///         if transition == StateChange::NullToReady {
///             // open the device here
///         }
///         let ret = element.parent_change_state(transition)?;
///         if transition == StateChange::ReadyToNull {
///             // close the device here
///         }
///         Ok(ret)
///     }
/// }
/// ```
pub trait ElementImpl: Send + Sync + 'static {
    /// Perform one adjacent state transition.
    fn change_state(
        &self,
        element: &Element,
        transition: StateChange,
    ) -> Result<StateChangeSuccess, StateChangeError> {
        element.parent_change_state(transition)
    }

    /// Handle an event sent to the element as a whole.
    fn send_event(&self, element: &Element, event: Event) -> bool {
        element.default_send_event(event)
    }

    /// Handle a message posted by a child element. Only containers see
    /// these; the default forwards the message upwards.
    fn handle_message(&self, element: &Element, message: Message) {
        element.post_message(message);
    }
}

/// Element without behaviour of its own; everything happens in pad hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultElementImpl;

impl ElementImpl for DefaultElementImpl {}
