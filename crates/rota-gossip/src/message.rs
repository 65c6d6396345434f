//! Protocol messages.
//!
//! Two message kinds cross the wire:
//! - [`SendLog`] - Gossip: the events the recipient is believed to lack,
//!   plus the sender's full time table
//! - [`DeleteConflict`] - Booking-conflict veto, sent to an appointment's
//!   originator by a participant whose calendar was already taken
//!
//! # Wire order
//!
//! [`Message`] serialises its payload enum first and the sender id last, so
//! an encoded message reads as: kind tag (`SendLog = 0`,
//! `DeleteConflict = 1`), kind-specific body, sender. Receivers dispatch on
//! the leading tag and drop frames with unknown tags at the decode layer.

use serde::{Deserialize, Serialize};

use rota_kernel::{Appointment, NodeId};

use crate::time_table::TimeTable;
use crate::types::EventRecord;

// ============================================================================
// Message Envelope
// ============================================================================

/// A protocol message with its sender identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The message payload. Kept first so the kind tag leads the encoding.
    pub payload: MessagePayload,

    /// The site that sent this message.
    pub from: NodeId,
}

impl Message {
    /// Creates a gossip message carrying `events` and the sender's table.
    pub fn send_log(from: NodeId, events: Vec<EventRecord>, time_table: TimeTable) -> Self {
        Self {
            payload: MessagePayload::SendLog(SendLog { events, time_table }),
            from,
        }
    }

    /// Creates a booking-conflict veto for `appt`.
    pub fn delete_conflict(from: NodeId, appt: Appointment) -> Self {
        Self {
            payload: MessagePayload::DeleteConflict(DeleteConflict { appt }),
            from,
        }
    }
}

// ============================================================================
// Message Payload
// ============================================================================

/// The payload of a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// Gossip: events the recipient lacks plus the sender's time table.
    SendLog(SendLog),

    /// A participant vetoes an appointment it cannot honour.
    DeleteConflict(DeleteConflict),
}

impl MessagePayload {
    /// Returns a human-readable name for the message kind.
    pub fn name(&self) -> &'static str {
        match self {
            MessagePayload::SendLog(_) => "SendLog",
            MessagePayload::DeleteConflict(_) => "DeleteConflict",
        }
    }
}

/// Gossip body: the novelty projection for one recipient.
///
/// `events` may be empty; an empty gossip still carries the time table,
/// which lets the recipient advance its own knowledge and garbage-collect
/// its partial log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLog {
    /// Events the recipient is believed to lack, in log order.
    pub events: Vec<EventRecord>,

    /// Snapshot of the sender's time table.
    pub time_table: TimeTable,
}

/// Conflict-veto body.
///
/// Carries the full appointment so the originator can cancel it without
/// consulting its own state first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteConflict {
    /// The appointment being vetoed.
    pub appt: Appointment,
}
