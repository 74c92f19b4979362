//! Queries: synchronous questions answered by a pad or its peer.

use super::Format;
use crate::caps::Caps;

/// What a pad's upstream can do, as reported by a scheduling query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulingFlags {
    /// Data can be pushed.
    pub push: bool,
    /// Data can be pulled with getrange.
    pub pull: bool,
    /// Pulls may use arbitrary offsets.
    pub seekable: bool,
}

/// A query. Handlers fill in the result fields and return `true` when they
/// answered it.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Which activation modes the peer supports.
    Scheduling(SchedulingFlags),
    /// Total stream duration.
    Duration {
        /// Requested unit.
        format: Format,
        /// Answer.
        result: Option<u64>,
    },
    /// Current position.
    Position {
        /// Requested unit.
        format: Format,
        /// Answer.
        result: Option<u64>,
    },
    /// Caps the pad can handle, optionally restricted by a filter.
    Caps {
        /// Restrict the answer to caps intersecting this.
        filter: Option<Caps>,
        /// Answer.
        result: Option<Caps>,
    },
    /// Whether the pad would accept these fixed caps.
    AcceptCaps {
        /// The caps in question.
        caps: Caps,
        /// Answer.
        result: bool,
    },
}

impl Query {
    /// New scheduling query.
    pub fn new_scheduling() -> Self {
        Query::Scheduling(SchedulingFlags::default())
    }

    /// New duration query.
    pub fn new_duration(format: Format) -> Self {
        Query::Duration {
            format,
            result: None,
        }
    }

    /// New position query.
    pub fn new_position(format: Format) -> Self {
        Query::Position {
            format,
            result: None,
        }
    }

    /// New caps query.
    pub fn new_caps(filter: Option<Caps>) -> Self {
        Query::Caps {
            filter,
            result: None,
        }
    }

    /// New accept-caps query.
    pub fn new_accept_caps(caps: Caps) -> Self {
        Query::AcceptCaps {
            caps,
            result: false,
        }
    }

    /// Human-readable name of the query type.
    pub fn name(&self) -> &'static str {
        match self {
            Query::Scheduling(_) => "scheduling",
            Query::Duration { .. } => "duration",
            Query::Position { .. } => "position",
            Query::Caps { .. } => "caps",
            Query::AcceptCaps { .. } => "accept-caps",
        }
    }

    /// Answer of a caps query.
    pub fn caps_result(&self) -> Option<&Caps> {
        match self {
            Query::Caps { result, .. } => result.as_ref(),
            _ => None,
        }
    }

    /// Answer of a duration or position query.
    pub fn value_result(&self) -> Option<u64> {
        match self {
            Query::Duration { result, .. } | Query::Position { result, .. } => *result,
            _ => None,
        }
    }
}
