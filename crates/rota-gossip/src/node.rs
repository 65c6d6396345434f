//! The calendar node: imperative shell around the replica state machine.
//!
//! [`CalendarNode`] owns the single replica mutex and everything impure:
//! the snapshot store, the transport, the inbound listener, and the
//! per-peer retry workers. The division of labour is strict:
//!
//! 1. Take the replica mutex, run the pure state transition
//! 2. Persist the snapshot while still holding the mutex (the on-disk
//!    state is always a valid point-in-time image)
//! 3. Release the mutex, then perform network I/O
//!
//! # Delivery and retries
//!
//! Sends are blocking, one message per attempt. An unreachable peer flips
//! its `send_fail` flag and spawns at most one retry worker, which sleeps
//! for the configured interval and reruns the full send path with a fresh
//! novelty projection, not a stale buffer. Undeliverable conflict vetoes
//! are queued per peer and drained by the same worker, since they cannot
//! be recomputed from the log. Any other I/O error is logged and the
//! message abandoned; the log-exchange protocol absorbs the loss.
//!
//! A failed snapshot write is fatal: in-memory and on-disk state would
//! otherwise diverge, so the node fail-stops and recovery restarts from
//! the previous good snapshot.

use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use rota_kernel::{Appointment, AppointmentId, CalendarGrid, NodeId};

use crate::config::ClusterConfig;
use crate::message::{Message, MessagePayload};
use crate::replica::{AppointmentRequest, Outbound, ReplicaOutput, ReplicaState, ScheduleError};
use crate::snapshot::{SnapshotError, SnapshotStore};
use crate::tcp::MessageListener;
use crate::transport::Transport;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while opening or wiring up a node.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Filesystem or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The snapshot file exists but could not be restored.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

// ============================================================================
// Per-peer delivery state
// ============================================================================

/// Liveness and retry bookkeeping for one peer.
#[derive(Debug, Default)]
struct PeerLink {
    /// True iff the most recent attempt failed and a retry is outstanding.
    send_fail: AtomicBool,

    /// Guard ensuring at most one retry worker per peer.
    retrying: AtomicBool,

    /// Conflict vetoes that could not be delivered. Unlike gossip, these
    /// are not recomputable from the partial log, so they wait here for
    /// the retry worker.
    pending_conflicts: Mutex<Vec<Appointment>>,
}

// ============================================================================
// Calendar Node
// ============================================================================

/// One site of the replicated calendar.
///
/// Cloneable handle semantics come from the inner `Arc`; the listener and
/// retry workers share the same core.
pub struct CalendarNode {
    inner: Arc<NodeInner>,
    listener: Option<MessageListener>,
}

struct NodeInner {
    node_id: NodeId,
    config: ClusterConfig,
    state: Mutex<ReplicaState>,
    snapshot: SnapshotStore,
    transport: Arc<dyn Transport>,
    peers: Vec<PeerLink>,
    retry_interval: Duration,
}

impl CalendarNode {
    /// Opens a node, restoring the previous snapshot if one exists.
    ///
    /// A fresh node writes its initial snapshot immediately, so recovery
    /// never has to distinguish "never started" from "crashed at birth".
    pub fn open(
        node_id: NodeId,
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        snapshot: SnapshotStore,
    ) -> Result<Self, NodeError> {
        let state = match snapshot.load()? {
            Some(data) => {
                debug!(node = %node_id, "restored from snapshot");
                ReplicaState::from_snapshot(node_id, config.clone(), data)
            }
            None => {
                let state = ReplicaState::new(node_id, config.clone());
                snapshot.save(&state.to_snapshot())?;
                debug!(node = %node_id, "fresh node, initial snapshot written");
                state
            }
        };

        let peers = (0..config.num_nodes()).map(|_| PeerLink::default()).collect();
        let retry_interval = config.timeouts.retry_interval;

        Ok(Self {
            inner: Arc::new(NodeInner {
                node_id,
                config,
                state: Mutex::new(state),
                snapshot,
                transport,
                peers,
                retry_interval,
            }),
            listener: None,
        })
    }

    /// Binds the inbound listener and starts accepting peer messages.
    ///
    /// Returns the bound address (bind port 0 to let the OS choose).
    pub fn listen(&mut self, bind_addr: &str) -> Result<SocketAddr, NodeError> {
        let inner = Arc::clone(&self.inner);
        let listener = MessageListener::spawn(bind_addr, move |message| {
            inner.handle_message(message);
        })?;
        let addr = listener.local_addr();
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Returns this site's id.
    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    /// Schedules a new appointment.
    ///
    /// Returns the minted id, or the rejection. Acceptance is decided
    /// against the local grid only; a peer may still veto asynchronously,
    /// which surfaces as the appointment disappearing from the calendar.
    pub fn create(&self, request: AppointmentRequest) -> Result<AppointmentId, ScheduleError> {
        let (id, output) = {
            let mut state = self.inner.lock_state();
            let (id, output) = state.create(request)?;
            self.inner.persist(&state);
            (id, output)
        };
        self.inner.dispatch(output);
        Ok(id)
    }

    /// Cancels a live appointment. Unknown ids are a no-op.
    pub fn cancel(&self, id: AppointmentId) {
        let output = {
            let mut state = self.inner.lock_state();
            let existed = state.calendar().contains(id);
            let output = state.cancel(id);
            if existed {
                self.inner.persist(&state);
            }
            output
        };
        self.inner.dispatch(output);
    }

    /// Returns a snapshot of the occupancy grid.
    pub fn read_calendar(&self) -> CalendarGrid {
        self.inner.lock_state().calendar().grid().clone()
    }

    /// Returns the live appointments, in id order.
    pub fn appointments(&self) -> Vec<Appointment> {
        self.inner.lock_state().calendar().live().cloned().collect()
    }

    /// Sends one gossip message to `peer`, even if there is no novelty;
    /// the time table alone advances the peer's knowledge.
    pub fn gossip(&self, peer: NodeId) {
        let message = self.inner.lock_state().gossip_to(peer);
        self.inner.send(peer, message);
    }

    /// Gossips to every other cluster member (anti-entropy round).
    pub fn gossip_all(&self) {
        for peer in self.inner.config.others(self.inner.node_id) {
            self.gossip(peer);
        }
    }

    /// Returns true if the last delivery to `peer` failed and a retry is
    /// outstanding.
    pub fn send_failed(&self, peer: NodeId) -> bool {
        self.inner.peers[peer.as_usize()]
            .send_fail
            .load(Ordering::SeqCst)
    }

    /// Stops the inbound listener. In-flight handlers finish first; the
    /// snapshot on disk is already current because every mutation persisted
    /// before dispatch.
    pub fn shutdown(mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
    }
}

impl NodeInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ReplicaState> {
        // A poisoned mutex means a handler panicked mid-mutation; the
        // snapshot discipline makes recovery-by-restart the only safe exit.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(_) => {
                error!("replica mutex poisoned; failing stop");
                process::abort();
            }
        }
    }

    /// Persists the current state. Must be called with the mutex held.
    fn persist(&self, state: &ReplicaState) {
        if let Err(e) = self.snapshot.save(&state.to_snapshot()) {
            error!(error = %e, "snapshot write failed; failing stop");
            process::abort();
        }
    }

    /// Applies one inbound message under the mutex, persists, then sends
    /// whatever the state machine produced.
    fn handle_message(self: &Arc<Self>, message: Message) {
        let output = {
            let mut state = self.lock_state();
            let output = state.on_message(message);
            self.persist(&state);
            output
        };
        self.dispatch(output);
    }

    fn dispatch(self: &Arc<Self>, output: ReplicaOutput) {
        for Outbound { to, message } in output.outbound {
            self.send(to, message);
        }
    }

    /// One delivery attempt, with retry scheduling on unreachable peers.
    fn send(self: &Arc<Self>, to: NodeId, message: Message) {
        let link = &self.peers[to.as_usize()];
        match self.transport.deliver(to, &message) {
            Ok(()) => {
                link.send_fail.store(false, Ordering::SeqCst);
            }
            Err(e) if e.is_retryable() => {
                warn!(peer = %to, error = %e, "peer unreachable, scheduling retry");
                if let MessagePayload::DeleteConflict(veto) = message.payload {
                    link.pending_conflicts
                        .lock()
                        .expect("conflict queue poisoned")
                        .push(veto.appt);
                }
                link.send_fail.store(true, Ordering::SeqCst);
                self.spawn_retry(to);
            }
            Err(e) => {
                warn!(peer = %to, error = %e, "delivery failed, not retrying");
            }
        }
    }

    /// Starts the retry worker for `to` unless one is already running.
    fn spawn_retry(self: &Arc<Self>, to: NodeId) {
        let link = &self.peers[to.as_usize()];
        if link.retrying.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("rota-retry-{to}"))
            .spawn(move || inner.retry_loop(to));
        if let Err(e) = spawned {
            warn!(peer = %to, error = %e, "could not spawn retry worker");
            link.retrying.store(false, Ordering::SeqCst);
        }
    }

    fn retry_loop(self: Arc<Self>, to: NodeId) {
        loop {
            thread::sleep(self.retry_interval);

            let link = &self.peers[to.as_usize()];
            if !link.send_fail.load(Ordering::SeqCst) {
                break;
            }

            if !self.flush_pending_conflicts(to) {
                continue;
            }

            // Rerun the full send path: the state may have advanced, so
            // compute a fresh projection rather than resending old bytes.
            let message = self.lock_state().gossip_to(to);
            match self.transport.deliver(to, &message) {
                Ok(()) => {
                    debug!(peer = %to, "retry delivered, peer reachable again");
                    link.send_fail.store(false, Ordering::SeqCst);
                    break;
                }
                Err(e) if e.is_retryable() => {
                    debug!(peer = %to, error = %e, "peer still unreachable");
                }
                Err(e) => {
                    warn!(peer = %to, error = %e, "retry hit terminal error, giving up");
                    link.send_fail.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }

        let link = &self.peers[to.as_usize()];
        link.retrying.store(false, Ordering::SeqCst);
        // A send may have failed between our exit check and the flag
        // store; make sure it is not left without a worker.
        if link.send_fail.load(Ordering::SeqCst) {
            self.spawn_retry(to);
        }
    }

    /// Redelivers queued conflict vetoes. Returns true once the queue is
    /// empty, false if the peer is still unreachable.
    fn flush_pending_conflicts(self: &Arc<Self>, to: NodeId) -> bool {
        let link = &self.peers[to.as_usize()];
        loop {
            let next = {
                let queue = link
                    .pending_conflicts
                    .lock()
                    .expect("conflict queue poisoned");
                queue.first().cloned()
            };
            let Some(appt) = next else {
                return true;
            };

            let message = Message::delete_conflict(self.node_id, appt);
            match self.transport.deliver(to, &message) {
                Ok(()) => {
                    let mut queue = link
                        .pending_conflicts
                        .lock()
                        .expect("conflict queue poisoned");
                    queue.remove(0);
                }
                Err(e) if e.is_retryable() => {
                    debug!(peer = %to, error = %e, "conflict veto still undeliverable");
                    return false;
                }
                Err(e) => {
                    warn!(peer = %to, error = %e, "dropping undeliverable conflict veto");
                    let mut queue = link
                        .pending_conflicts
                        .lock()
                        .expect("conflict queue poisoned");
                    queue.remove(0);
                }
            }
        }
    }
}
