//! The replica state machine.
//!
//! This module implements the replication engine as a pure, deterministic
//! state machine:
//!
//! - Takes user commands and peer messages as input
//! - Produces new state plus outgoing messages as output
//! - No I/O, no wall clocks, no randomness
//!
//! The shell ([`crate::node`]) owns the mutex, persists a snapshot after
//! every mutation, and hands the produced messages to the transport. The
//! same purity is what makes the simulation tests possible: a whole
//! cluster is just a `Vec<ReplicaState>` and a message queue.
//!
//! # Protocol Overview
//!
//! ```text
//! User ──create/cancel──► Replica A
//!                           │ append event, bump clock, update T
//!                           ├──SendLog{NP, T}──► peer participants
//!                           │
//! Replica B ◄───────────────┘
//!     │ extract novelty, apply deletes then inserts,
//!     │ merge T, garbage-collect PL
//!     └──DeleteConflict{appt}──► originator   (only on a booking clash)
//!                                    │
//!                                    └── cancels as if the user had
//! ```

mod state;

pub use state::ReplicaState;

use serde::{Deserialize, Serialize};

use rota_kernel::{AppointmentError, NodeId};

use crate::message::Message;

// ============================================================================
// Command Input
// ============================================================================

/// A user's request to schedule an appointment.
///
/// Raw fields as entered; validation happens inside
/// [`ReplicaState::create`], which also mints the appointment id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    /// Free-form label.
    pub name: String,
    /// Day offset within the calendar week.
    pub day: u8,
    /// First occupied slot.
    pub start_slot: u8,
    /// One past the last occupied slot.
    pub end_slot: u8,
    /// Participating sites; must include the scheduling site.
    pub participants: std::collections::BTreeSet<NodeId>,
}

// ============================================================================
// Command Errors
// ============================================================================

/// Errors surfaced synchronously by the command API.
///
/// Everything here leaves the replica untouched: invalid input is rejected
/// before any state change, and a local conflict is detected against the
/// current grid before the appointment id is even minted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The appointment fields are dimensionally invalid.
    #[error("invalid appointment: {0}")]
    InvalidAppointment(#[from] AppointmentError),

    /// A listed participant is not a member of the cluster.
    #[error("participant {0} is not a cluster member")]
    UnknownParticipant(NodeId),

    /// The scheduling site left itself out of the participant set.
    #[error("the scheduling site must participate in its own appointment")]
    OriginExcluded,

    /// The local grid already shows a listed participant busy in the
    /// requested range.
    #[error("a listed participant is already booked in the requested range")]
    LocalConflict,
}

// ============================================================================
// Replica Output
// ============================================================================

/// A message addressed to a specific peer.
///
/// Addressing lives outside [`Message`]: the wire format carries only the
/// sender, and the transport is told separately where to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// The peer to deliver to.
    pub to: NodeId,
    /// The message to deliver.
    pub message: Message,
}

/// Output produced by the replica state machine.
///
/// The caller is responsible for persisting the snapshot and then handing
/// each outbound message to the delivery loop.
#[derive(Debug, Clone, Default)]
pub struct ReplicaOutput {
    /// Messages to send, in production order.
    pub outbound: Vec<Outbound>,
}

impl ReplicaOutput {
    /// Creates an empty output.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Appends a message addressed to `to`.
    pub fn push(&mut self, to: NodeId, message: Message) {
        self.outbound.push(Outbound { to, message });
    }

    /// Returns true if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    /// Merges another output into this one.
    pub fn merge(&mut self, other: ReplicaOutput) {
        self.outbound.extend(other.outbound);
    }
}
