//! Identity and appointment types.
//!
//! - [`NodeId`] - Dense integer identifier for a calendar site
//! - [`AppointmentId`] - Origin-tagged appointment identity
//! - [`Appointment`] - An immutable calendar entry

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::ops::Range;

use serde::{Deserialize, Serialize};

// ============================================================================
// Calendar dimensions
// ============================================================================

/// Number of days the calendar spans (a fixed sliding week).
pub const CALENDAR_DAYS: usize = 7;

/// Number of 30-minute slots per day, anchored at midnight.
pub const SLOTS_PER_DAY: usize = 48;

/// Maximum number of sites in a cluster.
///
/// Cluster size is fixed at configuration time and every site holds a dense
/// `N × N` time table plus an `N`-row grid, so this stays small.
pub const MAX_NODES: usize = 64;

// ============================================================================
// Node Identifier - Copy (single byte)
// ============================================================================

/// Unique identifier for a site in the cluster.
///
/// Ids are dense integers in `[0, N)`, assigned at configuration time and
/// never reassigned. Uses `u8` internally since clusters are small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u8);

impl NodeId {
    /// Creates a new node ID.
    pub fn new(id: u8) -> Self {
        debug_assert!((id as usize) < MAX_NODES, "node ID exceeds MAX_NODES");
        Self(id)
    }

    /// Returns the node ID as a `u8`.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns the node ID as a `usize` for indexing.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

impl From<u8> for NodeId {
    fn from(id: u8) -> Self {
        Self::new(id)
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

// ============================================================================
// Appointment Identifier - Copy (origin + counter)
// ============================================================================

/// Globally unique appointment identity.
///
/// Formed from the originating site and that site's monotonic appointment
/// counter, so two sites can never mint the same id and ids are never
/// reused. Displays as `<origin>-<counter>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppointmentId {
    origin: NodeId,
    seq: u64,
}

impl AppointmentId {
    /// Creates an appointment ID from its origin site and local counter.
    pub fn new(origin: NodeId, seq: u64) -> Self {
        Self { origin, seq }
    }

    /// Returns the site that minted this ID.
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// Returns the origin-local counter value.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin.as_u8(), self.seq)
    }
}

// ============================================================================
// Appointment - Clone (heap name + participant set)
// ============================================================================

/// Errors raised when constructing an appointment from raw fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AppointmentError {
    /// The day offset is outside the calendar week.
    #[error("day {0} outside calendar range 0..{CALENDAR_DAYS}")]
    InvalidDay(u8),

    /// The slot range is empty, inverted, or past the end of the day.
    #[error("invalid slot range {start}..{end}")]
    InvalidSlots {
        /// Requested first slot.
        start: u8,
        /// Requested one-past-last slot.
        end: u8,
    },

    /// The participant set is empty.
    #[error("appointment has no participants")]
    NoParticipants,
}

/// An immutable calendar entry.
///
/// Appointments are created once, replicated verbatim, and never mutated;
/// cancellation removes the entry rather than editing it. All fields are
/// validated at construction, so a deserialized appointment from a
/// well-behaved peer upholds the same invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    id: AppointmentId,
    name: String,
    day: u8,
    start_slot: u8,
    end_slot: u8,
    participants: BTreeSet<NodeId>,
    origin: NodeId,
}

impl Appointment {
    /// Creates a new appointment.
    ///
    /// Validates the calendar dimensions: `day` within the week,
    /// `start_slot < end_slot <= SLOTS_PER_DAY`, and a non-empty
    /// participant set.
    pub fn new(
        id: AppointmentId,
        name: impl Into<String>,
        day: u8,
        start_slot: u8,
        end_slot: u8,
        participants: BTreeSet<NodeId>,
        origin: NodeId,
    ) -> Result<Self, AppointmentError> {
        if (day as usize) >= CALENDAR_DAYS {
            return Err(AppointmentError::InvalidDay(day));
        }
        if start_slot >= end_slot || (end_slot as usize) > SLOTS_PER_DAY {
            return Err(AppointmentError::InvalidSlots {
                start: start_slot,
                end: end_slot,
            });
        }
        if participants.is_empty() {
            return Err(AppointmentError::NoParticipants);
        }

        Ok(Self {
            id,
            name: name.into(),
            day,
            start_slot,
            end_slot,
            participants,
            origin,
        })
    }

    /// Returns the appointment's identity.
    pub fn id(&self) -> AppointmentId {
        self.id
    }

    /// Returns the user-supplied label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the day offset within the calendar week.
    pub fn day(&self) -> u8 {
        self.day
    }

    /// Returns the first occupied slot.
    pub fn start_slot(&self) -> u8 {
        self.start_slot
    }

    /// Returns one past the last occupied slot.
    pub fn end_slot(&self) -> u8 {
        self.end_slot
    }

    /// Returns the occupied slot indices as a range.
    pub fn slot_range(&self) -> Range<usize> {
        self.start_slot as usize..self.end_slot as usize
    }

    /// Returns the participating sites.
    pub fn participants(&self) -> &BTreeSet<NodeId> {
        &self.participants
    }

    /// Returns the site that scheduled this appointment.
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    /// Returns true if `node` participates in this appointment.
    pub fn involves(&self, node: NodeId) -> bool {
        self.participants.contains(&node)
    }

    /// Returns the participants other than `me` (the fan-out targets).
    pub fn peers_of(&self, me: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.participants.iter().copied().filter(move |&p| p != me)
    }
}
