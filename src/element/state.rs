//! Element states and transitions.

use std::fmt;
use thiserror::Error;

/// Lifecycle state of an element.
///
/// States are ordered: `Null < Ready < Paused < Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    /// Initial state; no resources held.
    #[default]
    Null,
    /// Non-stream resources acquired (devices, libraries).
    Ready,
    /// Pads active and stream resources allocated; data may flow, the
    /// clock is not running.
    Paused,
    /// Clock running.
    Playing,
}

impl State {
    /// The adjacent state one step towards `target`, or `None` if already
    /// there.
    pub fn next_toward(self, target: State) -> Option<State> {
        use State::*;
        match self.cmp(&target) {
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Less => Some(match self {
                Null => Ready,
                Ready => Paused,
                Paused | Playing => Playing,
            }),
            std::cmp::Ordering::Greater => Some(match self {
                Playing => Paused,
                Paused => Ready,
                Ready | Null => Null,
            }),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        })
    }
}

/// A transition between two adjacent states.
///
/// Only adjacent transitions exist; `Null -> Playing` is performed as three
/// of these in sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// Acquire non-stream resources.
    NullToReady,
    /// Activate pads and allocate stream resources.
    ReadyToPaused,
    /// Start the clock.
    PausedToPlaying,
    /// Stop the clock.
    PlayingToPaused,
    /// Deactivate pads and free stream resources.
    PausedToReady,
    /// Release everything.
    ReadyToNull,
}

impl StateChange {
    /// All transitions in upward-then-downward order.
    pub const ALL: [StateChange; 6] = [
        StateChange::NullToReady,
        StateChange::ReadyToPaused,
        StateChange::PausedToPlaying,
        StateChange::PlayingToPaused,
        StateChange::PausedToReady,
        StateChange::ReadyToNull,
    ];

    /// The transition from `from` to `to`, if they are adjacent.
    pub fn between(from: State, to: State) -> Option<StateChange> {
        Self::ALL
            .into_iter()
            .find(|t| t.current() == from && t.next() == to)
    }

    /// State before the transition.
    pub fn current(self) -> State {
        match self {
            StateChange::NullToReady => State::Null,
            StateChange::ReadyToPaused | StateChange::ReadyToNull => State::Ready,
            StateChange::PausedToPlaying | StateChange::PausedToReady => State::Paused,
            StateChange::PlayingToPaused => State::Playing,
        }
    }

    /// State after the transition.
    pub fn next(self) -> State {
        match self {
            StateChange::ReadyToNull => State::Null,
            StateChange::NullToReady | StateChange::PausedToReady => State::Ready,
            StateChange::ReadyToPaused | StateChange::PlayingToPaused => State::Paused,
            StateChange::PausedToPlaying => State::Playing,
        }
    }

    /// True for transitions towards `Playing`.
    pub fn is_upward(self) -> bool {
        self.next() > self.current()
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.current(), self.next())
    }
}

/// Successful outcome of a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateChangeSuccess {
    /// The transition completed.
    #[default]
    Success,
    /// The transition completes later; completion is signalled with an
    /// async-done message. Only legal for upward transitions.
    Async,
    /// Completed, but the element cannot produce data in PAUSED (live
    /// sources).
    NoPreroll,
}

/// An element refused a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Default)]
#[error("state change failed")]
pub struct StateChangeError;
