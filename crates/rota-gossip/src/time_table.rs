//! The two-dimensional time table.
//!
//! [`TimeTable`] is the N×N matrix at the heart of the replication engine:
//! entry `(j, k)` is this replica's best lower bound on "what site `j`
//! knows about site `k`'s clock". Row `self` tracks the replica's own
//! knowledge; the diagonal entry `(i, i)` at site `i` equals `i`'s clock.
//!
//! Two questions drive everything else:
//! - [`has_rec`](TimeTable::has_rec): is site `k` known to have observed a
//!   given event? Decides what to ship (`NP`), what is news (`NE`), and
//!   what the partial log may drop.
//! - [`merge_from`](TimeTable::merge_from): fold in a peer's table on
//!   receive. The sender's own row is applied to our row first ("I now
//!   know what the sender knows"), then the whole matrix takes the
//!   element-wise maximum.

use serde::{Deserialize, Serialize};

use rota_kernel::NodeId;

use crate::types::{EventClock, EventRecord};

/// Dense N×N matrix of clock lower bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTable {
    n: usize,
    rows: Vec<Vec<EventClock>>,
}

impl TimeTable {
    /// Creates an all-zero table for a cluster of `n` sites.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            rows: vec![vec![EventClock::ZERO; n]; n],
        }
    }

    /// Returns the cluster size.
    pub fn len(&self) -> usize {
        self.n
    }

    /// Returns true for a zero-site table (never constructed in practice).
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Returns entry `(row, col)`: what `row` knows about `col`'s clock.
    pub fn get(&self, row: NodeId, col: NodeId) -> EventClock {
        self.rows[row.as_usize()][col.as_usize()]
    }

    /// Records that site `me` has advanced its own clock.
    ///
    /// Keeps the diagonal identity `T[i][i] = clock_i`.
    pub fn advance_self(&mut self, me: NodeId, clock: EventClock) {
        debug_assert!(
            clock >= self.rows[me.as_usize()][me.as_usize()],
            "own clock must not move backwards"
        );
        self.rows[me.as_usize()][me.as_usize()] = clock;
    }

    /// Returns true if site `k` is known to have observed `record`.
    pub fn has_rec(&self, record: &EventRecord, k: NodeId) -> bool {
        self.get(k, record.origin) >= record.clock
    }

    /// Returns true if every site in the cluster is known to have observed
    /// `record`, the condition for dropping it from the partial log.
    pub fn known_to_all(&self, record: &EventRecord) -> bool {
        (0..self.n).all(|k| self.has_rec(record, NodeId::new(k as u8)))
    }

    /// Folds a peer's table into this one on receive.
    ///
    /// First our own row absorbs the sender's row: everything the sender
    /// knows, we now know. Then every entry takes the element-wise maximum,
    /// propagating third-party knowledge the sender had collected.
    pub fn merge_from(&mut self, other: &TimeTable, sender: NodeId, me: NodeId) {
        debug_assert_eq!(self.n, other.n, "time tables must agree on cluster size");

        let me = me.as_usize();
        let sender = sender.as_usize();
        for r in 0..self.n {
            self.rows[me][r] = self.rows[me][r].max(other.rows[sender][r]);
        }
        for r in 0..self.n {
            for s in 0..self.n {
                self.rows[r][s] = self.rows[r][s].max(other.rows[r][s]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventOp;
    use rota_kernel::{Appointment, AppointmentId};
    use std::collections::BTreeSet;

    fn record(origin: u8, clock: u64) -> EventRecord {
        let origin = NodeId::new(origin);
        EventRecord::new(
            EventOp::Insert,
            EventClock::new(clock),
            origin,
            Appointment::new(
                AppointmentId::new(origin, clock),
                "t",
                0,
                1,
                2,
                [origin].into_iter().collect::<BTreeSet<_>>(),
                origin,
            )
            .unwrap(),
        )
    }

    #[test]
    fn fresh_table_knows_nothing() {
        let table = TimeTable::new(3);
        let r = record(1, 1);
        for k in 0..3 {
            assert!(!table.has_rec(&r, NodeId::new(k)));
        }
        assert!(!table.known_to_all(&r));
    }

    #[test]
    fn advance_self_sets_diagonal() {
        let mut table = TimeTable::new(2);
        table.advance_self(NodeId::new(1), EventClock::new(3));
        assert_eq!(table.get(NodeId::new(1), NodeId::new(1)), EventClock::new(3));
        assert_eq!(table.get(NodeId::new(0), NodeId::new(1)), EventClock::ZERO);
    }

    #[test]
    fn merge_absorbs_sender_row_into_own_row() {
        // Peer 1 has seen three of its own events; we have seen none.
        let mut theirs = TimeTable::new(3);
        theirs.advance_self(NodeId::new(1), EventClock::new(3));

        let mut ours = TimeTable::new(3);
        ours.merge_from(&theirs, NodeId::new(1), NodeId::new(0));

        // Our row learned the sender's knowledge of itself.
        assert_eq!(ours.get(NodeId::new(0), NodeId::new(1)), EventClock::new(3));
        // And the sender's row survived the element-wise max.
        assert_eq!(ours.get(NodeId::new(1), NodeId::new(1)), EventClock::new(3));
        // Third parties are untouched.
        assert_eq!(ours.get(NodeId::new(2), NodeId::new(1)), EventClock::ZERO);
    }

    #[test]
    fn merge_propagates_third_party_knowledge() {
        // Peer 1 learned (via gossip) that peer 2 has seen 2 of 0's events.
        let mut theirs = TimeTable::new(3);
        theirs.rows[2][0] = EventClock::new(2);

        let mut ours = TimeTable::new(3);
        ours.merge_from(&theirs, NodeId::new(1), NodeId::new(0));

        let r1 = record(0, 1);
        let r3 = record(0, 3);
        assert!(ours.has_rec(&r1, NodeId::new(2)));
        assert!(!ours.has_rec(&r3, NodeId::new(2)));
    }

    #[test]
    fn known_to_all_requires_every_site() {
        let mut table = TimeTable::new(2);
        let r = record(0, 1);

        table.advance_self(NodeId::new(0), EventClock::new(1));
        assert!(!table.known_to_all(&r));

        table.rows[1][0] = EventClock::new(1);
        assert!(table.known_to_all(&r));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut theirs = TimeTable::new(3);
        theirs.rows[1][1] = EventClock::new(5);
        theirs.rows[2][0] = EventClock::new(2);

        let mut once = TimeTable::new(3);
        once.merge_from(&theirs, NodeId::new(1), NodeId::new(0));
        let mut twice = once.clone();
        twice.merge_from(&theirs, NodeId::new(1), NodeId::new(0));

        assert_eq!(once, twice);
    }
}
