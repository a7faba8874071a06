//! Validated startup configuration.
//!
//! Misconfiguration is fatal: these constructors run before any socket is
//! bound and `main` exits on the first error.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::clock::{ClockError, ReplicaId};

/// Smallest cluster the deployment accepts.
pub const MIN_REPLICAS: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least {} replicas are required, got {}", MIN_REPLICAS, .0)]
    TooFewReplicas(usize),
    #[error("invalid replica id: {0}")]
    InvalidReplicaId(#[from] ClockError),
    #[error("peer list contains this node's own listen address {0}")]
    SelfInPeers(String),
    #[error("address {0} is listed more than once")]
    DuplicateAddress(String),
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    pub id: ReplicaId,
    pub listen: SocketAddr,
    /// Addresses of the other `N - 1` replicas.
    pub peers: Vec<String>,
    pub timeout: Duration,
}

impl ReplicaConfig {
    pub fn new(
        id: usize,
        listen: SocketAddr,
        peers: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let cluster_size = peers.len() + 1;
        if cluster_size < MIN_REPLICAS {
            return Err(ConfigError::TooFewReplicas(cluster_size));
        }
        let id = ReplicaId::new(id, cluster_size)?;
        if let Some(own) = peers.iter().find(|peer| peer.parse::<SocketAddr>().ok() == Some(listen)) {
            return Err(ConfigError::SelfInPeers(own.clone()));
        }
        reject_duplicates(&peers)?;
        ensure_timeout(timeout)?;

        Ok(Self {
            id,
            listen,
            peers,
            timeout,
        })
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen: SocketAddr,
    /// Every replica the coordinator may route to.
    pub replicas: Vec<String>,
    pub timeout: Duration,
}

impl CoordinatorConfig {
    pub fn new(
        listen: SocketAddr,
        replicas: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if replicas.len() < MIN_REPLICAS {
            return Err(ConfigError::TooFewReplicas(replicas.len()));
        }
        reject_duplicates(&replicas)?;
        ensure_timeout(timeout)?;

        Ok(Self {
            listen,
            replicas,
            timeout,
        })
    }

    pub fn cluster_size(&self) -> usize {
        self.replicas.len()
    }
}

fn reject_duplicates(addrs: &[String]) -> Result<(), ConfigError> {
    for (index, addr) in addrs.iter().enumerate() {
        if addrs[..index].contains(addr) {
            return Err(ConfigError::DuplicateAddress(addr.clone()));
        }
    }
    Ok(())
}

fn ensure_timeout(timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::ZeroTimeout);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listen() -> SocketAddr {
        "127.0.0.1:50051".parse().expect("valid addr")
    }

    fn peers(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn replica_accepts_three_node_cluster() {
        let config = ReplicaConfig::new(
            0,
            listen(),
            peers(&["127.0.0.1:50052", "127.0.0.1:50053"]),
            TIMEOUT,
        )
        .expect("valid config");
        assert_eq!(config.cluster_size(), 3);
        assert_eq!(config.id.index(), 0);
    }

    #[test]
    fn replica_rejects_too_few_peers() {
        let err = ReplicaConfig::new(0, listen(), peers(&["127.0.0.1:50052"]), TIMEOUT).unwrap_err();
        assert_eq!(err, ConfigError::TooFewReplicas(2));
    }

    #[test]
    fn replica_rejects_out_of_range_id() {
        let err = ReplicaConfig::new(
            3,
            listen(),
            peers(&["127.0.0.1:50052", "127.0.0.1:50053"]),
            TIMEOUT,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidReplicaId(ClockError::ReplicaOutOfRange { id: 3, size: 3 })
        );
    }

    #[test]
    fn replica_rejects_itself_as_peer() {
        let err = ReplicaConfig::new(
            0,
            listen(),
            peers(&["127.0.0.1:50051", "127.0.0.1:50053"]),
            TIMEOUT,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::SelfInPeers("127.0.0.1:50051".into()));
    }

    #[test]
    fn coordinator_requires_three_replicas() {
        let err = CoordinatorConfig::new(
            listen(),
            peers(&["127.0.0.1:50052", "127.0.0.1:50053"]),
            TIMEOUT,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::TooFewReplicas(2));
    }

    #[test]
    fn coordinator_rejects_duplicates_and_zero_timeout() {
        let dup = CoordinatorConfig::new(
            listen(),
            peers(&["a:1", "b:1", "a:1"]),
            TIMEOUT,
        )
        .unwrap_err();
        assert_eq!(dup, ConfigError::DuplicateAddress("a:1".into()));

        let zero = CoordinatorConfig::new(listen(), peers(&["a:1", "b:1", "c:1"]), Duration::ZERO)
            .unwrap_err();
        assert_eq!(zero, ConfigError::ZeroTimeout);
    }
}
