//! Replica state and the gossip algorithm.
//!
//! [`ReplicaState`] holds everything one site knows: its scalar clock, the
//! N×N time table, the full event log `L`, the partial log `PL` (events
//! some peer still lacks), the calendar state (dictionary plus grid), and
//! the appointment counter. All methods are pure with respect to the
//! outside world; the shell serialises calls under one mutex.

use std::collections::BTreeSet;

use tracing::{debug, trace, warn};

use rota_kernel::{Appointment, AppointmentId, CalendarState, NodeId};

use crate::config::ClusterConfig;
use crate::message::{Message, MessagePayload, SendLog};
use crate::snapshot::SnapshotData;
use crate::time_table::TimeTable;
use crate::types::{EventClock, EventOp, EventRecord};

use super::{AppointmentRequest, ReplicaOutput, ScheduleError};

/// The complete replication state of one calendar site.
#[derive(Debug, Clone)]
pub struct ReplicaState {
    /// This site's id.
    node_id: NodeId,

    /// Cluster configuration.
    config: ClusterConfig,

    /// This site's event counter.
    clock: EventClock,

    /// What every site knows about every site's clock.
    time_table: TimeTable,

    /// Every event this site has ever observed. Grows monotonically and is
    /// never persisted; recovery re-seeds it from the partial log.
    log: BTreeSet<EventRecord>,

    /// Events at least one peer still lacks; the send buffer.
    partial_log: BTreeSet<EventRecord>,

    /// Live appointments and the derived occupancy grid.
    calendar: CalendarState,

    /// Counter for appointment ids minted by this site.
    appt_no: u64,
}

impl ReplicaState {
    /// Creates a fresh replica with an empty calendar and zeroed clocks.
    pub fn new(node_id: NodeId, config: ClusterConfig) -> Self {
        debug_assert!(config.contains(node_id), "node must be in its own cluster");

        let n = config.num_nodes();
        Self {
            node_id,
            config,
            clock: EventClock::ZERO,
            time_table: TimeTable::new(n),
            log: BTreeSet::new(),
            partial_log: BTreeSet::new(),
            calendar: CalendarState::new(n),
            appt_no: 0,
        }
    }

    /// Rebuilds a replica from a recovered snapshot.
    ///
    /// The full log is seeded from the partial log: any record absent from
    /// `PL` was already known to every peer and is observationally dead.
    pub fn from_snapshot(node_id: NodeId, config: ClusterConfig, data: SnapshotData) -> Self {
        debug_assert_eq!(
            data.time_table.len(),
            config.num_nodes(),
            "snapshot written for a different cluster size"
        );
        let log = data.partial_log.iter().cloned().collect();
        Self {
            node_id,
            config,
            clock: data.clock,
            time_table: data.time_table,
            log,
            partial_log: data.partial_log.into_iter().collect(),
            calendar: data.calendar,
            appt_no: data.appt_no,
        }
    }

    /// Captures the durable portion of this replica's state.
    pub fn to_snapshot(&self) -> SnapshotData {
        SnapshotData {
            clock: self.clock,
            time_table: self.time_table.clone(),
            partial_log: self.partial_log.iter().cloned().collect(),
            calendar: self.calendar.clone(),
            appt_no: self.appt_no,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns this site's id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the cluster configuration.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Returns this site's current event clock.
    pub fn clock(&self) -> EventClock {
        self.clock
    }

    /// Returns the time table.
    pub fn time_table(&self) -> &TimeTable {
        &self.time_table
    }

    /// Returns the full event log.
    pub fn log(&self) -> &BTreeSet<EventRecord> {
        &self.log
    }

    /// Returns the partial log (events pending for at least one peer).
    pub fn partial_log(&self) -> &BTreeSet<EventRecord> {
        &self.partial_log
    }

    /// Returns the calendar state (dictionary plus grid).
    pub fn calendar(&self) -> &CalendarState {
        &self.calendar
    }

    // ========================================================================
    // Command API
    // ========================================================================

    /// Schedules a new appointment.
    ///
    /// Validates the request, checks every listed participant's row in the
    /// local grid, and only then mints the next appointment id. On success
    /// the output fans a gossip message out to each peer participant.
    pub fn create(
        &mut self,
        request: AppointmentRequest,
    ) -> Result<(AppointmentId, ReplicaOutput), ScheduleError> {
        for &p in &request.participants {
            if !self.config.contains(p) {
                return Err(ScheduleError::UnknownParticipant(p));
            }
        }
        if !request.participants.contains(&self.node_id) {
            return Err(ScheduleError::OriginExcluded);
        }

        let id = AppointmentId::new(self.node_id, self.appt_no);
        let appt = Appointment::new(
            id,
            request.name,
            request.day,
            request.start_slot,
            request.end_slot,
            request.participants,
            self.node_id,
        )?;

        if self.calendar.any_participant_busy(&appt) {
            debug!(appt = %id, "create rejected: local grid shows a busy slot");
            return Err(ScheduleError::LocalConflict);
        }

        self.appt_no += 1;
        self.record_local(EventOp::Insert, appt.clone());
        self.calendar.insert(appt.clone());

        debug!(appt = %id, name = appt.name(), "appointment scheduled");
        Ok((id, self.fan_out(&appt)))
    }

    /// Cancels a live appointment.
    ///
    /// Unknown ids are a no-op with empty output, which lets the conflict
    /// resolver reuse this path unconditionally.
    pub fn cancel(&mut self, id: AppointmentId) -> ReplicaOutput {
        let Some(appt) = self.calendar.remove(id) else {
            trace!(appt = %id, "cancel of unknown appointment ignored");
            return ReplicaOutput::empty();
        };

        self.record_local(EventOp::Delete, appt.clone());
        debug!(appt = %id, "appointment cancelled");
        self.fan_out(&appt)
    }

    // ========================================================================
    // Gossip
    // ========================================================================

    /// Builds the gossip message for `peer`: the events `peer` is not yet
    /// known to have, plus a snapshot of our time table.
    ///
    /// An empty event set is still worth sending: the table alone lets the
    /// peer advance its knowledge and garbage-collect its partial log.
    pub fn gossip_to(&self, peer: NodeId) -> Message {
        let events: Vec<EventRecord> = self
            .partial_log
            .iter()
            .filter(|r| !self.time_table.has_rec(r, peer))
            .cloned()
            .collect();
        Message::send_log(self.node_id, events, self.time_table.clone())
    }

    // ========================================================================
    // Receive
    // ========================================================================

    /// Applies one inbound message and returns whatever must be sent in
    /// response (conflict vetoes, or the fan-out of a conflict-driven
    /// cancellation).
    pub fn on_message(&mut self, message: Message) -> ReplicaOutput {
        if !self.config.contains(message.from) {
            warn!(from = %message.from, "message from unknown site dropped");
            return ReplicaOutput::empty();
        }

        trace!(from = %message.from, kind = message.payload.name(), "message received");
        match message.payload {
            MessagePayload::SendLog(send_log) => self.on_send_log(message.from, send_log),
            MessagePayload::DeleteConflict(veto) => {
                debug!(appt = %veto.appt.id(), "peer vetoed our appointment");
                self.cancel(veto.appt.id())
            }
        }
    }

    /// The receive half of the gossip protocol. Substep order is load
    /// bearing: deletes before inserts preserves the net effect of a batch,
    /// the table merge comes after event application so a crash in between
    /// replays idempotently, and garbage collection runs last against the
    /// merged table.
    fn on_send_log(&mut self, sender: NodeId, send_log: SendLog) -> ReplicaOutput {
        let SendLog { events, time_table } = send_log;
        let mut output = ReplicaOutput::empty();

        // Novelty: events our own row does not already account for.
        let novel: Vec<EventRecord> = events
            .into_iter()
            .filter(|r| !self.time_table.has_rec(r, self.node_id))
            .collect();
        trace!(from = %sender, novel = novel.len(), "gossip novelty extracted");

        for record in &novel {
            self.log.insert(record.clone());
        }

        // Deletes first.
        for record in novel.iter().filter(|r| r.is_delete()) {
            self.calendar.remove(record.appt_id());
        }

        // Inserts, skipping any id also deleted in this same batch: a
        // create–cancel pair that travelled together is observably a no-op.
        let deleted_in_batch: BTreeSet<AppointmentId> = novel
            .iter()
            .filter(|r| r.is_delete())
            .map(|r| r.appt_id())
            .collect();

        for record in novel.iter().filter(|r| r.is_insert()) {
            if deleted_in_batch.contains(&record.appt_id()) {
                continue;
            }
            let appt = &record.appt;

            if appt.involves(self.node_id) && self.calendar.booking_conflict(self.node_id, appt) {
                // Our row is already taken by a different appointment:
                // veto back to the originator instead of installing.
                debug!(appt = %appt.id(), origin = %appt.origin(), "booking conflict detected");
                output.push(
                    appt.origin(),
                    Message::delete_conflict(self.node_id, appt.clone()),
                );
                continue;
            }

            self.calendar.insert(appt.clone());
        }

        // Merge tables, then prune: drop what everyone now has, keep any
        // novelty some site still lacks.
        self.time_table.merge_from(&time_table, sender, self.node_id);

        self.partial_log
            .retain(|r| !self.time_table.known_to_all(r));
        for record in novel {
            if !self.time_table.known_to_all(&record) {
                self.partial_log.insert(record);
            }
        }

        output
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Appends a locally-originated event: clock tick, diagonal update,
    /// log and partial-log insertion.
    fn record_local(&mut self, op: EventOp, appt: Appointment) {
        self.clock = self.clock.next();
        self.time_table.advance_self(self.node_id, self.clock);

        let record = EventRecord::new(op, self.clock, self.node_id, appt);
        self.log.insert(record.clone());
        // In a single-site cluster the event is instantly known to all.
        if !self.time_table.known_to_all(&record) {
            self.partial_log.insert(record);
        }
    }

    /// One gossip message per peer participant, each with its own novelty
    /// projection.
    fn fan_out(&self, appt: &Appointment) -> ReplicaOutput {
        let mut output = ReplicaOutput::empty();
        for peer in appt.peers_of(self.node_id) {
            output.push(peer, self.gossip_to(peer));
        }
        output
    }

    // ========================================================================
    // Test support
    // ========================================================================

    /// Asserts the per-replica invariants that must hold in every reachable
    /// state. Panics with a description on violation. Test support; cheap
    /// enough to call after every step of a simulation.
    pub fn assert_invariants(&self) {
        // Diagonal identity.
        assert_eq!(
            self.time_table.get(self.node_id, self.node_id),
            self.clock,
            "{}: T[self][self] must equal own clock",
            self.node_id
        );

        // Self-knowledge: everything in L is covered by our own row.
        for record in &self.log {
            assert!(
                self.time_table.has_rec(record, self.node_id),
                "{}: log record {record} not covered by own time-table row",
                self.node_id
            );
        }

        // Every live appointment is backed by an insert with no delete.
        for appt in self.calendar.live() {
            let id = appt.id();
            assert!(
                self.log.iter().any(|r| r.is_insert() && r.appt_id() == id),
                "{}: live appointment {id} has no insert in the log",
                self.node_id
            );
            assert!(
                !self.log.iter().any(|r| r.is_delete() && r.appt_id() == id),
                "{}: live appointment {id} has a delete in the log",
                self.node_id
            );
        }

        // The grid is a projection of the dictionary.
        assert_eq!(
            *self.calendar.grid(),
            rota_kernel::CalendarGrid::project(self.calendar.nodes(), self.calendar.live()),
            "{}: grid out of step with dictionary",
            self.node_id
        );

        // PL ⊆ L.
        for record in &self.partial_log {
            assert!(
                self.log.contains(record),
                "{}: partial log contains {record} missing from the log",
                self.node_id
            );
        }
    }

    /// Extra invariants that only hold once gossip has quiesced: the
    /// dictionary matches the log exactly and the partial log carries
    /// nothing every site already has.
    pub fn assert_quiescent_invariants(&self) {
        self.assert_invariants();

        for record in &self.log {
            if record.is_insert()
                && !self
                    .log
                    .iter()
                    .any(|r| r.is_delete() && r.appt_id() == record.appt_id())
            {
                assert!(
                    self.calendar.contains(record.appt_id()),
                    "{}: undeleted insert {record} missing from dictionary",
                    self.node_id
                );
            }
        }

        for record in &self.partial_log {
            assert!(
                !self.time_table.known_to_all(record),
                "{}: partial log retains {record} already known to all",
                self.node_id
            );
        }
    }
}
