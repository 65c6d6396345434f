//! Deterministic multi-replica simulation tests.
//!
//! A simulated cluster is just a `Vec<ReplicaState>` and a message queue:
//! no threads, no sockets, no disk. The harness can drop gossip on
//! configured links, deliver in random order, and duplicate messages,
//! which exercises the protocol's tolerance for every transport fault the
//! real delivery loop can produce.
//!
//! Conflict vetoes are never dropped by the harness: in the real system
//! the delivery loop queues and retries them until the originator is
//! reached, so "eventually delivered" is part of their contract.
//!
//! Invariants are asserted on every replica after every delivery, and the
//! quiescent invariants after convergence.

use std::collections::{BTreeSet, HashSet, VecDeque};

use rand::prelude::*;
use rand::rngs::SmallRng;

use rota_kernel::{AppointmentId, CalendarGrid, NodeId};

use crate::config::ClusterConfig;
use crate::message::{Message, MessagePayload};
use crate::replica::{AppointmentRequest, ReplicaOutput, ReplicaState, ScheduleError};

// ============================================================================
// Simulated Cluster
// ============================================================================

/// An in-flight message addressed to one replica.
#[derive(Debug, Clone)]
struct Envelope {
    to: NodeId,
    message: Message,
}

/// A cluster of pure replicas joined by a controllable message queue.
struct SimCluster {
    replicas: Vec<ReplicaState>,
    queue: VecDeque<Envelope>,
    /// Links currently dropping gossip, as `(from, to)` pairs.
    down_links: HashSet<(NodeId, NodeId)>,
    /// Total conflict vetoes produced by any replica.
    vetoes_seen: usize,
}

impl SimCluster {
    fn new(n: usize) -> Self {
        let config = ClusterConfig::new(n);
        Self {
            replicas: (0..n)
                .map(|i| ReplicaState::new(NodeId::new(i as u8), config.clone()))
                .collect(),
            queue: VecDeque::new(),
            down_links: HashSet::new(),
            vetoes_seen: 0,
        }
    }

    fn node(&self, id: u8) -> &ReplicaState {
        &self.replicas[id as usize]
    }

    fn create(
        &mut self,
        node: u8,
        name: &str,
        day: u8,
        start: u8,
        end: u8,
        participants: &[u8],
    ) -> Result<AppointmentId, ScheduleError> {
        let request = AppointmentRequest {
            name: name.to_string(),
            day,
            start_slot: start,
            end_slot: end,
            participants: participants.iter().copied().map(NodeId::new).collect(),
        };
        let (id, output) = self.replicas[node as usize].create(request)?;
        self.enqueue(output);
        Ok(id)
    }

    fn cancel(&mut self, node: u8, id: AppointmentId) {
        let output = self.replicas[node as usize].cancel(id);
        self.enqueue(output);
    }

    /// Queues one anti-entropy gossip from `from` to `to`.
    fn gossip(&mut self, from: u8, to: u8) {
        let message = self.replicas[from as usize].gossip_to(NodeId::new(to));
        self.queue.push_back(Envelope {
            to: NodeId::new(to),
            message,
        });
    }

    fn enqueue(&mut self, output: ReplicaOutput) {
        for outbound in output.outbound {
            if matches!(outbound.message.payload, MessagePayload::DeleteConflict(_)) {
                self.vetoes_seen += 1;
            }
            self.queue.push_back(Envelope {
                to: outbound.to,
                message: outbound.message,
            });
        }
    }

    fn link_down(&mut self, from: u8, to: u8) {
        self.down_links.insert((NodeId::new(from), NodeId::new(to)));
    }

    fn link_up(&mut self, from: u8, to: u8) {
        self.down_links.remove(&(NodeId::new(from), NodeId::new(to)));
    }

    /// Delivers the frontmost message. Returns false when the queue is
    /// empty. Messages crossing a down link are silently dropped, like a
    /// transport that never reaches its peer.
    fn deliver_next(&mut self) -> bool {
        let Some(envelope) = self.queue.pop_front() else {
            return false;
        };
        self.deliver(envelope);
        true
    }

    fn deliver(&mut self, envelope: Envelope) {
        if self.down_links.contains(&(envelope.message.from, envelope.to)) {
            return;
        }
        let output = self.replicas[envelope.to.as_usize()].on_message(envelope.message);
        self.replicas[envelope.to.as_usize()].assert_invariants();
        self.enqueue(output);
    }

    /// Delivers everything currently queued, in order.
    fn drain(&mut self) {
        while self.deliver_next() {}
    }

    /// Runs full anti-entropy rounds (every ordered pair, both directions)
    /// until no replica changes, which is the "gossip quiesces"
    /// precondition of the convergence property.
    fn exchange_until_quiescent(&mut self) {
        self.drain();
        loop {
            let before = self.fingerprints();
            let n = self.replicas.len() as u8;
            for from in 0..n {
                for to in 0..n {
                    if from != to {
                        self.gossip(from, to);
                        self.drain();
                    }
                }
            }
            if self.fingerprints() == before {
                break;
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn fingerprints(
        &self,
    ) -> Vec<(
        rota_kernel::CalendarState,
        BTreeSet<crate::types::EventRecord>,
        BTreeSet<crate::types::EventRecord>,
        crate::time_table::TimeTable,
    )> {
        self.replicas
            .iter()
            .map(|r| {
                (
                    r.calendar().clone(),
                    r.log().clone(),
                    r.partial_log().clone(),
                    r.time_table().clone(),
                )
            })
            .collect()
    }

    /// Asserts that every pair of replicas agrees on dictionary, grid,
    /// log, and time table, and that the quiescent invariants hold.
    fn assert_converged(&self) {
        let first = &self.replicas[0];
        for other in &self.replicas[1..] {
            assert_eq!(
                first.calendar(),
                other.calendar(),
                "dictionaries diverged between {} and {}",
                first.node_id(),
                other.node_id()
            );
            assert_eq!(first.log(), other.log(), "logs diverged");
            assert_eq!(first.time_table(), other.time_table(), "time tables diverged");
        }
        for replica in &self.replicas {
            replica.assert_quiescent_invariants();
            assert!(
                replica.partial_log().is_empty(),
                "{}: partial log not drained after quiescence",
                replica.node_id()
            );
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn s1_two_party_schedule() {
    let mut sim = SimCluster::new(2);
    let id = sim.create(0, "sync", 0, 10, 12, &[0, 1]).unwrap();
    sim.drain();

    for node in 0..2 {
        let replica = sim.node(node);
        assert!(replica.calendar().contains(id));
        for slot in 10..12 {
            assert_eq!(replica.calendar().grid().slot(NodeId::new(0), 0, slot), Some(id));
            assert_eq!(replica.calendar().grid().slot(NodeId::new(1), 0, slot), Some(id));
        }
    }

    use crate::types::EventClock;
    assert_eq!(sim.node(0).clock(), EventClock::new(1));
    assert_eq!(sim.node(0).time_table().get(NodeId::new(0), NodeId::new(0)), EventClock::new(1));
    assert_eq!(sim.node(1).time_table().get(NodeId::new(0), NodeId::new(0)), EventClock::new(1));
    assert_eq!(sim.node(1).time_table().get(NodeId::new(1), NodeId::new(0)), EventClock::new(1));

    // The return gossip tells node 0 that node 1 has the event.
    sim.gossip(1, 0);
    sim.drain();
    assert!(sim.node(0).partial_log().is_empty());
}

#[test]
fn s2_cancel_propagation() {
    let mut sim = SimCluster::new(2);
    let id = sim.create(0, "sync", 0, 10, 12, &[0, 1]).unwrap();
    sim.drain();

    // Any participant may cancel, not just the originator.
    sim.cancel(1, id);
    sim.drain();

    for node in 0..2 {
        let replica = sim.node(node);
        assert!(replica.calendar().is_empty());
        assert!(replica.calendar().grid().is_all_vacant());
        assert_eq!(replica.log().len(), 2, "insert and delete both retained");
    }

    sim.gossip(0, 1);
    sim.drain();
    assert!(sim.node(0).partial_log().is_empty());
    assert!(sim.node(1).partial_log().is_empty());
}

#[test]
fn s3_mutual_veto_on_concurrent_overlap() {
    let mut sim = SimCluster::new(2);

    // Neither site sees the other's booking before scheduling locally.
    sim.create(0, "a", 0, 10, 12, &[0, 1]).unwrap();
    sim.create(1, "b", 0, 11, 13, &[0, 1]).unwrap();
    sim.drain();

    assert_eq!(sim.vetoes_seen, 2, "each side vetoes the other");

    sim.exchange_until_quiescent();
    for node in 0..2 {
        let replica = sim.node(node);
        assert!(replica.calendar().is_empty(), "both appointments cancelled");
        assert!(replica.calendar().grid().is_all_vacant());
        assert_eq!(
            replica.log().iter().filter(|r| r.is_delete()).count(),
            2,
            "both deletes present everywhere"
        );
    }
    sim.assert_converged();
}

#[test]
fn s4_lossy_link_healed_by_relay() {
    let mut sim = SimCluster::new(3);
    sim.link_down(0, 2);

    let id = sim.create(0, "x", 0, 5, 6, &[0, 1, 2]).unwrap();
    sim.drain();

    // Direct 0→2 delivery was dropped; node 1 relays.
    assert!(sim.node(1).calendar().contains(id));
    assert!(!sim.node(2).calendar().contains(id));

    sim.gossip(1, 2);
    sim.drain();
    assert!(sim.node(2).calendar().contains(id));

    // Knowledge of node 2's progress flows back: 2 → 1 → 0.
    sim.gossip(2, 1);
    sim.gossip(1, 0);
    sim.drain();

    // The link heals; node 0 now knows node 2 has the event, so the
    // novelty projection for 2 is empty and no duplicate is delivered.
    sim.link_up(0, 2);
    let MessagePayload::SendLog(send_log) = sim.node(0).gossip_to(NodeId::new(2)).payload else {
        panic!("expected gossip");
    };
    assert!(send_log.events.is_empty());
    assert!(sim.node(0).partial_log().is_empty());

    assert_eq!(
        sim.node(2).log().len(),
        1,
        "relayed insert applied exactly once"
    );

    sim.exchange_until_quiescent();
    sim.assert_converged();
}

#[test]
fn s5_crash_and_recover_resends_from_partial_log() {
    let mut sim = SimCluster::new(2);
    let id = sim.create(0, "x", 3, 7, 9, &[0, 1]).unwrap();

    // The outbound message never left: drop everything in flight, then
    // crash node 0 and rebuild it from its snapshot.
    sim.queue.clear();
    let config = sim.node(0).config().clone();
    let snapshot = sim.node(0).to_snapshot();
    sim.replicas[0] = ReplicaState::from_snapshot(NodeId::new(0), config, snapshot);

    assert_eq!(sim.node(0).partial_log().len(), 1);
    assert!(sim.node(0).calendar().contains(id));

    // The delivery loop recomputes the same projection and convergence
    // is reached.
    sim.gossip(0, 1);
    sim.drain();
    assert!(sim.node(1).calendar().contains(id));

    sim.exchange_until_quiescent();
    sim.assert_converged();
}

#[test]
fn s6_passive_replica_carries_state_without_conflicts() {
    let mut sim = SimCluster::new(3);
    sim.create(0, "standup", 0, 10, 12, &[0, 1]).unwrap();
    sim.create(1, "review", 1, 20, 24, &[0, 1]).unwrap();
    sim.drain();

    sim.exchange_until_quiescent();
    sim.assert_converged();

    // Node 2 mirrors the appointments and grid rows of the participants
    // but its own row stays vacant and it never vetoed anything.
    let passive = sim.node(2);
    assert_eq!(passive.calendar().len(), 2);
    assert_eq!(
        passive.calendar().grid().slot(NodeId::new(0), 0, 10),
        sim.node(0).calendar().grid().slot(NodeId::new(0), 0, 10)
    );
    for day in 0..7u8 {
        for slot in 0..48u8 {
            assert_eq!(passive.calendar().grid().slot(NodeId::new(2), day, slot), None);
        }
    }
    assert_eq!(sim.vetoes_seen, 0);
}

// ============================================================================
// Fault-injected convergence
// ============================================================================

#[test]
fn convergence_under_random_loss_reorder_and_duplication() {
    let mut rng = SmallRng::seed_from_u64(0x0dd5);

    for round in 0..10 {
        let n = 3usize;
        let mut sim = SimCluster::new(n);
        let mut live: Vec<(u8, AppointmentId)> = Vec::new();

        for op in 0..25 {
            let node = rng.gen_range(0..n as u8);
            if rng.gen_bool(0.25) && !live.is_empty() {
                let (owner, id) = live.swap_remove(rng.gen_range(0..live.len()));
                sim.cancel(owner, id);
            } else {
                let day = rng.gen_range(0..7u8);
                let start = rng.gen_range(0..46u8);
                let end = start + rng.gen_range(1..=2u8);
                let mut participants: Vec<u8> = vec![node];
                for other in 0..n as u8 {
                    if other != node && rng.gen_bool(0.5) {
                        participants.push(other);
                    }
                }
                match sim.create(node, &format!("r{round}-o{op}"), day, start, end, &participants)
                {
                    Ok(id) => live.push((node, id)),
                    Err(ScheduleError::LocalConflict) => {}
                    Err(e) => panic!("unexpected rejection: {e}"),
                }
            }

            // Deliver a random prefix of the queue with faults: drop or
            // duplicate gossip, deliver in shuffled order. Vetoes are
            // exempt from drops (the delivery loop retries them).
            for _ in 0..rng.gen_range(0..4) {
                if sim.queue.is_empty() {
                    break;
                }
                let pick = rng.gen_range(0..sim.queue.len());
                let envelope = sim.queue.remove(pick).unwrap();
                let is_gossip =
                    matches!(envelope.message.payload, MessagePayload::SendLog(_));
                if is_gossip && rng.gen_bool(0.2) {
                    continue; // lost in transit
                }
                if is_gossip && rng.gen_bool(0.15) {
                    sim.queue.push_back(envelope.clone()); // duplicated
                }
                sim.deliver(envelope);
            }
        }

        sim.exchange_until_quiescent();
        sim.assert_converged();
    }
}

#[test]
fn convergence_after_partition_heals() {
    let mut sim = SimCluster::new(3);

    // Node 2 is cut off in both directions while 0 and 1 keep working.
    sim.link_down(0, 2);
    sim.link_down(1, 2);
    sim.link_down(2, 0);
    sim.link_down(2, 1);

    let a = sim.create(0, "a", 0, 1, 3, &[0, 1]).unwrap();
    sim.create(2, "c", 2, 10, 12, &[2]).unwrap();
    sim.drain();
    sim.cancel(1, a);
    sim.drain();

    assert!(sim.node(2).calendar().len() == 1);

    sim.link_up(0, 2);
    sim.link_up(1, 2);
    sim.link_up(2, 0);
    sim.link_up(2, 1);

    sim.exchange_until_quiescent();
    sim.assert_converged();

    // The partitioned node's solo appointment survived; "a" did not.
    let grid: &CalendarGrid = sim.node(0).calendar().grid();
    assert_eq!(sim.node(0).calendar().len(), 1);
    assert!(grid.slot(NodeId::new(2), 2, 10).is_some());
}
