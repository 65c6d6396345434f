//! # rota-kernel: Functional core of the rota calendar
//!
//! The kernel is the pure, deterministic heart of the replicated calendar.
//! It owns the user-visible state (the dictionary of live appointments and
//! the occupancy grid derived from it) and nothing else.
//!
//! ## Key Principles
//!
//! - **No IO**: The kernel never touches disk, network, or any external resource
//! - **No clocks**: Event ordering is the replication layer's concern
//! - **No randomness**: Same input always produces same output
//!
//! The replication engine (`rota-gossip`) drives this crate: user commands
//! and remote events both reduce to `CalendarState::insert` and
//! `CalendarState::remove`, with conflict checks answered from the grid.
//!
//! ## Architecture
//!
//! - [`types`]: Identity and appointment types ([`NodeId`], [`AppointmentId`], [`Appointment`])
//! - [`grid`]: The occupancy grid, a pure projection of the dictionary
//! - [`state`]: [`CalendarState`], the dictionary plus its cached grid

pub mod grid;
pub mod state;
pub mod types;


pub use grid::CalendarGrid;
pub use state::CalendarState;
pub use types::{
    Appointment, AppointmentError, AppointmentId, NodeId, CALENDAR_DAYS, MAX_NODES, SLOTS_PER_DAY,
};
