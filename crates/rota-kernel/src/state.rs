//! Calendar state: the dictionary of live appointments plus its grid.
//!
//! [`CalendarState`] is the kernel's whole mutable surface. The dictionary
//! maps appointment ids to appointments; the grid is rebuilt from the
//! dictionary after every mutation so it is always an exact projection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::grid::CalendarGrid;
use crate::types::{Appointment, AppointmentId, NodeId};

/// The live appointments of one replica, with the derived occupancy grid.
///
/// Mutation goes through [`insert`](Self::insert) and
/// [`remove`](Self::remove) only; both keep the grid in step. Replicas that
/// hold equal dictionaries therefore hold equal grids, which the
/// convergence property relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarState {
    nodes: usize,
    appts: BTreeMap<AppointmentId, Appointment>,
    grid: CalendarGrid,
}

impl CalendarState {
    /// Creates an empty calendar for a cluster of `nodes` sites.
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            appts: BTreeMap::new(),
            grid: CalendarGrid::vacant(nodes),
        }
    }

    /// Returns the cluster size this calendar was built for.
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// Returns the appointment with the given id, if live.
    pub fn get(&self, id: AppointmentId) -> Option<&Appointment> {
        self.appts.get(&id)
    }

    /// Returns true if an appointment with the given id is live.
    pub fn contains(&self, id: AppointmentId) -> bool {
        self.appts.contains_key(&id)
    }

    /// Returns the number of live appointments.
    pub fn len(&self) -> usize {
        self.appts.len()
    }

    /// Returns true if no appointments are live.
    pub fn is_empty(&self) -> bool {
        self.appts.is_empty()
    }

    /// Iterates the live appointments in id order.
    pub fn live(&self) -> impl Iterator<Item = &Appointment> {
        self.appts.values()
    }

    /// Returns the cached occupancy grid.
    pub fn grid(&self) -> &CalendarGrid {
        &self.grid
    }

    /// Installs an appointment and repaints the grid.
    pub fn insert(&mut self, appt: Appointment) {
        self.appts.insert(appt.id(), appt);
        self.reproject();
    }

    /// Removes an appointment, returning it if it was live.
    ///
    /// Removing an unknown id is a no-op, which makes delete application
    /// idempotent.
    pub fn remove(&mut self, id: AppointmentId) -> Option<Appointment> {
        let removed = self.appts.remove(&id);
        if removed.is_some() {
            self.reproject();
        }
        removed
    }

    /// Local admission check for `create`: true if any listed participant
    /// is already busy anywhere in the requested range.
    pub fn any_participant_busy(&self, appt: &Appointment) -> bool {
        self.grid.any_busy(
            appt.participants().iter().copied(),
            appt.day(),
            appt.slot_range(),
        )
    }

    /// Receive-side booking-conflict check: true if installing `appt` would
    /// collide with a different appointment in `me`'s own row.
    pub fn booking_conflict(&self, me: NodeId, appt: &Appointment) -> bool {
        self.grid.collides(me, appt)
    }

    fn reproject(&mut self) {
        self.grid = CalendarGrid::project(self.nodes, self.appts.values());
    }
}
