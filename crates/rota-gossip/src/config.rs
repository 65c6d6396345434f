//! Cluster configuration.
//!
//! Membership is fixed at configuration time: a cluster of `N` sites with
//! dense ids `0..N`. Peer network addresses are configured separately on
//! the transport (see [`crate::tcp::ClusterAddresses`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use rota_kernel::{NodeId, MAX_NODES};

// ============================================================================
// Cluster Configuration
// ============================================================================

/// Configuration for a calendar cluster.
///
/// Immutable once the cluster is formed; there is no reconfiguration
/// protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    num_nodes: usize,

    /// Delivery retry configuration.
    pub timeouts: TimeoutConfig,
}

impl ClusterConfig {
    /// Creates a configuration for a cluster of `num_nodes` sites.
    ///
    /// # Panics
    ///
    /// Panics if `num_nodes` is zero or exceeds [`MAX_NODES`].
    pub fn new(num_nodes: usize) -> Self {
        assert!(num_nodes > 0, "cluster must have at least one site");
        assert!(num_nodes <= MAX_NODES, "cluster size exceeds MAX_NODES");
        Self {
            num_nodes,
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Creates a configuration for a single-site cluster.
    ///
    /// A single site never sends gossip (fan-out excludes self), but keeps
    /// the same API and persistence behaviour.
    pub fn single_node() -> Self {
        Self::new(1)
    }

    /// Returns the number of sites in the cluster.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Returns true if this is a single-site cluster.
    pub fn is_single_node(&self) -> bool {
        self.num_nodes == 1
    }

    /// Returns true if `id` is a member of this cluster.
    pub fn contains(&self, id: NodeId) -> bool {
        id.as_usize() < self.num_nodes
    }

    /// Returns an iterator over all member ids.
    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.num_nodes).map(|i| NodeId::new(i as u8))
    }

    /// Returns the members other than `exclude`.
    pub fn others(&self, exclude: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.members().filter(move |&id| id != exclude)
    }

    /// Sets the timeout configuration.
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }
}

// ============================================================================
// Timeout Configuration
// ============================================================================

/// Delivery retry timing.
///
/// The only timer in the protocol: how long an unreachable peer's retry
/// task sleeps before rerunning the send path. Delivery itself is
/// fire-and-reattempt; the log and time table handle reorder and loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Pause between redelivery attempts to an unreachable peer.
    pub retry_interval: Duration,
}

impl TimeoutConfig {
    /// Production timing: retry unreachable peers every 10 seconds.
    pub fn production() -> Self {
        Self {
            retry_interval: Duration::from_secs(10),
        }
    }

    /// Local development timing: quick retries.
    pub fn development() -> Self {
        Self {
            retry_interval: Duration::from_millis(250),
        }
    }

    /// Test timing: near-immediate retries for fast test execution.
    pub fn simulation() -> Self {
        Self {
            retry_interval: Duration::from_millis(5),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_dense() {
        let config = ClusterConfig::new(3);
        assert_eq!(config.num_nodes(), 3);
        assert!(config.contains(NodeId::new(2)));
        assert!(!config.contains(NodeId::new(3)));

        let members: Vec<_> = config.members().collect();
        assert_eq!(members, vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)]);
    }

    #[test]
    fn others_excludes_self() {
        let config = ClusterConfig::new(3);
        let others: Vec<_> = config.others(NodeId::new(1)).collect();
        assert_eq!(others, vec![NodeId::new(0), NodeId::new(2)]);
    }

    #[test]
    fn single_node_cluster() {
        let config = ClusterConfig::single_node();
        assert!(config.is_single_node());
        assert_eq!(config.others(NodeId::new(0)).count(), 0);
    }

    #[test]
    #[should_panic(expected = "at least one site")]
    fn empty_cluster_panics() {
        let _ = ClusterConfig::new(0);
    }
}
