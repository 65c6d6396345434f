//! # rota-gossip: Replication engine for the rota calendar
//!
//! This crate implements an eventually-consistent replication protocol for
//! a shared weekly calendar: a causally-aware append-only event log with a
//! two-dimensional time table, so each site knows precisely which events
//! every peer has already observed. Gossip carries only the novelty for
//! its recipient, the send buffer garbage-collects itself, and concurrent
//! double-bookings are resolved by a veto round trip to the originator.
//!
//! ## Overview
//!
//! Sites are peers; there is no leader. Each site:
//! - **Appends** locally-originated insert/delete events to its log
//! - **Gossips** the events a peer lacks, plus its full time table
//! - **Merges** inbound gossip: deletes, then inserts (with booking-conflict
//!   checks on its own calendar row), then the table, then prunes its
//!   partial log
//! - **Persists** a full snapshot after every mutation, atomically
//!
//! Once gossip quiesces, every non-faulty site holds the same appointments,
//! the same occupancy grid, the same log, and the same time table, even
//! under message loss, reorder, duplication, and crash-restart.
//!
//! ## Architecture
//!
//! ```text
//! User command            Peer message
//!      │                       │
//!      ▼                       ▼
//! ┌────────────────────────────────────┐
//! │  CalendarNode (shell)              │  mutex, snapshot, delivery loop
//! │  ┌──────────────────────────────┐  │
//! │  │  ReplicaState (pure)         │  │  clock, time table, L/PL,
//! │  │  └─ CalendarState (kernel)   │  │  dictionary V, grid C
//! │  └──────────────────────────────┘  │
//! └───────────────┬────────────────────┘
//!                 │ Outbound{to, Message}
//!                 ▼
//!       Transport (TCP / test double)
//! ```
//!
//! ## Key Components
//!
//! - [`replica`]: The pure state machine: command API, gossip projection,
//!   the six-step receive path, conflict vetoes
//! - [`time_table`]: The N×N matrix clock and the `has_rec` predicate
//! - [`message`] / [`framing`]: Wire types and the length + CRC32 frame
//! - [`snapshot`]: Atomic per-site persistence; recovery re-seeds the log
//!   from the partial log
//! - [`node`]: The imperative shell: replica mutex, listener, retries
//! - [`transport`] / [`tcp`]: Delivery abstraction and the one-shot TCP
//!   implementation

pub mod config;
pub mod framing;
pub mod message;
pub mod node;
pub mod replica;
pub mod snapshot;
pub mod tcp;
pub mod time_table;
pub mod transport;
pub mod types;

#[cfg(test)]
mod simulation;

// Re-exports for convenient access
pub use config::{ClusterConfig, TimeoutConfig};
pub use framing::FramingError;
pub use message::{DeleteConflict, Message, MessagePayload, SendLog};
pub use node::{CalendarNode, NodeError};
pub use replica::{AppointmentRequest, Outbound, ReplicaOutput, ReplicaState, ScheduleError};
pub use snapshot::{SnapshotData, SnapshotError, SnapshotStore};
pub use tcp::{ClusterAddresses, MessageListener, TcpTransport};
pub use time_table::TimeTable;
pub use transport::{DeliverError, MessageSink, NullTransport, Transport};
pub use types::{EventClock, EventOp, EventRecord};
