//! TCP transport and inbound listener.
//!
//! Peers exchange messages over short-lived connections: each connection
//! carries exactly one framed message and is then closed. Delivery blocks
//! the calling thread; the node's delivery loop decides what runs where.
//!
//! Addresses are configured as `host:port` strings and resolved per
//! delivery, so DNS changes are picked up without restarting. A resolution
//! failure or refused connection classifies as unreachable (the retry
//! loop's signal), while mid-write failures are terminal for that attempt.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use rota_kernel::NodeId;

use crate::framing;
use crate::message::Message;
use crate::transport::{DeliverError, Transport};

// ============================================================================
// Peer Address Configuration
// ============================================================================

/// Network addresses for every site in the cluster, as `host:port` strings.
#[derive(Debug, Clone)]
pub struct ClusterAddresses {
    addresses: HashMap<NodeId, String>,
}

impl ClusterAddresses {
    /// Creates a new cluster address configuration.
    pub fn new(addresses: HashMap<NodeId, String>) -> Self {
        debug_assert!(!addresses.is_empty(), "cluster must have at least one member");
        Self { addresses }
    }

    /// Creates from a list of `(NodeId, address)` pairs.
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (NodeId, impl Into<String>)>,
    ) -> Self {
        Self::new(pairs.into_iter().map(|(id, a)| (id, a.into())).collect())
    }

    /// Returns the address for a site.
    pub fn get(&self, id: NodeId) -> Option<&str> {
        self.addresses.get(&id).map(String::as_str)
    }

    /// Returns the number of configured sites.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Returns true if no addresses are configured.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

// ============================================================================
// TCP Transport
// ============================================================================

/// One-shot-connection TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addresses: ClusterAddresses,
}

impl TcpTransport {
    /// Creates a transport over the given address book.
    pub fn new(addresses: ClusterAddresses) -> Self {
        Self { addresses }
    }

    fn connect(addr: &str) -> Result<TcpStream, DeliverError> {
        // Resolve explicitly so an unknown host classifies as unreachable
        // rather than as a generic I/O failure.
        let resolved: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(DeliverError::Unreachable)?
            .collect();
        if resolved.is_empty() {
            return Err(DeliverError::Unreachable(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no addresses for {addr}"),
            )));
        }

        let mut last_err = None;
        for candidate in resolved {
            match TcpStream::connect(candidate) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        let err = last_err.expect("at least one candidate was tried");
        if matches!(
            err.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::HostUnreachable
                | io::ErrorKind::NetworkUnreachable
                | io::ErrorKind::TimedOut
        ) {
            Err(DeliverError::Unreachable(err))
        } else {
            Err(DeliverError::Io(err))
        }
    }
}

impl Transport for TcpTransport {
    fn deliver(&self, to: NodeId, message: &Message) -> Result<(), DeliverError> {
        let addr = self.addresses.get(to).ok_or_else(|| {
            DeliverError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no address configured for {to}"),
            ))
        })?;

        let mut stream = Self::connect(addr)?;
        framing::write_message(&mut stream, message).map_err(|e| match e {
            framing::FramingError::Io(io_err) => DeliverError::Io(io_err),
            other => DeliverError::Io(io::Error::new(io::ErrorKind::InvalidData, other.to_string())),
        })?;
        let _ = stream.shutdown(Shutdown::Write);

        debug!(peer = %to, kind = message.payload.name(), "message delivered");
        Ok(())
    }
}

// ============================================================================
// Inbound Listener
// ============================================================================

/// Accepts inbound connections and hands each decoded message to a handler.
///
/// One message per connection; frames that fail to decode are logged and
/// dropped without reaching the handler.
pub struct MessageListener {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MessageListener {
    /// Binds `bind_addr` and starts the accept loop on its own thread.
    ///
    /// The handler runs on the listener thread, one message at a time.
    pub fn spawn<F>(bind_addr: &str, handler: F) -> io::Result<Self>
    where
        F: Fn(Message) + Send + 'static,
    {
        let listener = TcpListener::bind(bind_addr)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("rota-listener".into())
            .spawn(move || accept_loop(&listener, &accept_flag, handler))?;

        debug!(addr = %local_addr, "listener started");
        Ok(Self {
            local_addr,
            shutdown,
            handle: Some(handle),
        })
    }

    /// Returns the bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the accept loop and waits for the listener thread to exit.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the blocking accept with a throwaway connection.
        let _ = TcpStream::connect(self.local_addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MessageListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.local_addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop<F>(listener: &TcpListener, shutdown: &AtomicBool, handler: F)
where
    F: Fn(Message),
{
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match framing::read_message(&mut stream) {
                    Ok(message) => handler(message),
                    Err(e) => {
                        // Liberal listener: malformed input never reaches
                        // replica state.
                        warn!(peer = %peer, error = %e, "dropping undecodable message");
                    }
                }
            }
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                warn!(error = %e, "accept failed");
            }
        }
    }
}
