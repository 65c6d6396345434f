//! The occupancy grid.
//!
//! [`CalendarGrid`] answers "who is busy when" in O(1) per slot. It is a
//! pure projection of the appointment dictionary: every cell holds the id
//! of the appointment occupying that participant/day/slot, or nothing.
//! The grid is cached on the state rather than recomputed per query, but
//! it is always rebuilt *from* the dictionary so that replicas holding the
//! same dictionary hold bit-identical grids.

use serde::{Deserialize, Serialize};

use crate::types::{Appointment, AppointmentId, NodeId, CALENDAR_DAYS, SLOTS_PER_DAY};

/// Dense `participants × days × slots` occupancy view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarGrid {
    nodes: usize,
    cells: Vec<Option<AppointmentId>>,
}

impl CalendarGrid {
    /// Creates a fully vacant grid for a cluster of `nodes` sites.
    pub fn vacant(nodes: usize) -> Self {
        Self {
            nodes,
            cells: vec![None; nodes * CALENDAR_DAYS * SLOTS_PER_DAY],
        }
    }

    /// Builds the grid as a projection of the given appointments.
    ///
    /// Appointments must be supplied in a deterministic order (the state
    /// iterates its `BTreeMap`), so contested cells resolve identically on
    /// every replica.
    pub fn project<'a>(nodes: usize, appts: impl Iterator<Item = &'a Appointment>) -> Self {
        let mut grid = Self::vacant(nodes);
        for appt in appts {
            grid.paint(appt);
        }
        grid
    }

    /// Returns the number of participant rows.
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// Returns the occupant of a cell, if any.
    pub fn slot(&self, participant: NodeId, day: u8, slot: u8) -> Option<AppointmentId> {
        self.cells[self.index(participant.as_usize(), day as usize, slot as usize)]
    }

    /// Returns true if every cell is vacant.
    pub fn is_all_vacant(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }

    /// Returns true if any of `participants` is busy during the given
    /// day/slot range. This is the local admission check for `create`.
    pub fn any_busy<I>(&self, participants: I, day: u8, slots: std::ops::Range<usize>) -> bool
    where
        I: IntoIterator<Item = NodeId>,
    {
        for p in participants {
            for s in slots.clone() {
                if self.cells[self.index(p.as_usize(), day as usize, s)].is_some() {
                    return true;
                }
            }
        }
        false
    }

    /// Returns true if installing `appt` would collide with a *different*
    /// appointment in `participant`'s row. This is the receive-side booking
    /// conflict check; a cell already holding `appt` itself does not count,
    /// so re-applying an install is not a conflict.
    pub fn collides(&self, participant: NodeId, appt: &Appointment) -> bool {
        let row = participant.as_usize();
        let day = appt.day() as usize;
        appt.slot_range().any(|s| {
            matches!(self.cells[self.index(row, day, s)], Some(held) if held != appt.id())
        })
    }

    fn paint(&mut self, appt: &Appointment) {
        let day = appt.day() as usize;
        for p in appt.participants() {
            let row = p.as_usize();
            for s in appt.slot_range() {
                let idx = self.index(row, day, s);
                self.cells[idx] = Some(appt.id());
            }
        }
    }

    fn index(&self, participant: usize, day: usize, slot: usize) -> usize {
        debug_assert!(participant < self.nodes);
        debug_assert!(day < CALENDAR_DAYS);
        debug_assert!(slot < SLOTS_PER_DAY);
        (participant * CALENDAR_DAYS + day) * SLOTS_PER_DAY + slot
    }
}
