//! Transport abstraction for message delivery.
//!
//! The replication engine needs exactly one operation from the network:
//! *attempt to deliver one framed message to a peer, blocking*. The
//! [`Transport`] trait captures that, plus two non-network implementations:
//!
//! - [`NullTransport`]: for single-site operation (no peers to reach)
//! - [`MessageSink`]: collects sends for test inspection
//!
//! Delivery makes no ordering or reliability promises beyond its return
//! value; the log and time table absorb loss, reorder, and duplication.
//! The error type distinguishes "peer unreachable" (the retry loop's
//! trigger) from other I/O failures (logged and dropped).

use std::fmt::Debug;
use std::sync::Mutex;

use rota_kernel::NodeId;

use crate::message::Message;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by a delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliverError {
    /// The peer could not be reached at all (connection refused, unknown
    /// host). The delivery loop schedules a retry for these.
    #[error("peer unreachable: {0}")]
    Unreachable(#[source] std::io::Error),

    /// Any other transport failure. Logged, not retried.
    #[error("delivery failed: {0}")]
    Io(#[source] std::io::Error),
}

impl DeliverError {
    /// Returns true if the delivery loop should schedule a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliverError::Unreachable(_))
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Blocking, single-message delivery to a peer.
pub trait Transport: Debug + Send + Sync {
    /// Attempts to deliver one message to `to`, blocking until the message
    /// is handed off or the attempt fails.
    fn deliver(&self, to: NodeId, message: &Message) -> Result<(), DeliverError>;
}

// ============================================================================
// Null Transport (for single-site operation)
// ============================================================================

/// A no-op transport for a single-site cluster.
///
/// Fan-out always excludes the local site, so nothing is ever delivered;
/// any call that does arrive is accepted and discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn deliver(&self, _to: NodeId, _message: &Message) -> Result<(), DeliverError> {
        Ok(())
    }
}

// ============================================================================
// Message Sink (for testing)
// ============================================================================

/// A transport that records every send for later inspection.
#[derive(Debug, Default)]
pub struct MessageSink {
    messages: Mutex<Vec<(NodeId, Message)>>,
}

impl MessageSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns all recorded sends.
    pub fn drain(&self) -> Vec<(NodeId, Message)> {
        let mut messages = self.messages.lock().expect("lock poisoned");
        std::mem::take(&mut *messages)
    }

    /// Returns the number of recorded sends.
    pub fn len(&self) -> usize {
        self.messages.lock().expect("lock poisoned").len()
    }

    /// Returns true if nothing has been sent.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for MessageSink {
    fn deliver(&self, to: NodeId, message: &Message) -> Result<(), DeliverError> {
        let mut messages = self.messages.lock().expect("lock poisoned");
        messages.push((to, message.clone()));
        Ok(())
    }
}
