//! Core replication types.
//!
//! This module defines the event-log vocabulary:
//! - [`EventClock`] - A site's scalar event counter
//! - [`EventOp`] - Insert or Delete
//! - [`EventRecord`] - One immutable log entry, tagged with origin and clock

use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use rota_kernel::{Appointment, AppointmentId, NodeId};

// ============================================================================
// Event Clock - Copy (8-byte value)
// ============================================================================

/// A site's scalar event counter.
///
/// Incremented by exactly one on every locally-originated insert or delete.
/// Clock values start at zero and the first event carries clock one, so a
/// time-table entry of zero means "has seen nothing from that site".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventClock(u64);

impl EventClock {
    /// The initial clock value (no events yet).
    pub const ZERO: EventClock = EventClock(0);

    /// Creates a clock from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the clock as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next clock value.
    pub fn next(&self) -> Self {
        EventClock(self.0.saturating_add(1))
    }
}

impl Display for EventClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl From<u64> for EventClock {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<EventClock> for u64 {
    fn from(clock: EventClock) -> Self {
        clock.0
    }
}

// ============================================================================
// Event Operation - Copy (small enum)
// ============================================================================

/// The two operations a calendar event can describe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EventOp {
    /// The appointment was scheduled.
    Insert,
    /// The appointment was cancelled.
    Delete,
}

impl Display for EventOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventOp::Insert => write!(f, "insert"),
            EventOp::Delete => write!(f, "delete"),
        }
    }
}

// ============================================================================
// Event Record - Clone (carries the full appointment)
// ============================================================================

/// One immutable entry of the replicated event log.
///
/// The record carries the full appointment, not just its id, so a delete
/// can be applied by a replica that never saw the matching insert.
///
/// Identity (equality, hashing, ordering) is over
/// `(origin, clock, op, appointment id)` only: the embedded appointment is
/// immutable and fully determined by its id, so it does not participate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Whether this event schedules or cancels the appointment.
    pub op: EventOp,

    /// The originating site's clock when the event was created.
    pub clock: EventClock,

    /// The site that originated the event.
    pub origin: NodeId,

    /// The affected appointment, replicated in full.
    pub appt: Appointment,
}

impl EventRecord {
    /// Creates a new event record.
    pub fn new(op: EventOp, clock: EventClock, origin: NodeId, appt: Appointment) -> Self {
        Self {
            op,
            clock,
            origin,
            appt,
        }
    }

    /// Returns the id of the affected appointment.
    pub fn appt_id(&self) -> AppointmentId {
        self.appt.id()
    }

    /// Returns true if this is an insert.
    pub fn is_insert(&self) -> bool {
        self.op == EventOp::Insert
    }

    /// Returns true if this is a delete.
    pub fn is_delete(&self) -> bool {
        self.op == EventOp::Delete
    }

    fn identity(&self) -> (NodeId, EventClock, EventOp, AppointmentId) {
        (self.origin, self.clock, self.op, self.appt.id())
    }
}

impl PartialEq for EventRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for EventRecord {}

impl Hash for EventRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for EventRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{} {}", self.origin, self.clock, self.op, self.appt.id())
    }
}
