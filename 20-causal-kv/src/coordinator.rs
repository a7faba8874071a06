//! Stateless request router in front of the replicas.
//!
//! Every replica is a full mirror, so routing ignores the key: each request
//! goes to the next replica in round-robin order. Reads and writes draw from
//! the same counter. A failed downstream call fails the client request; there
//! is no retry and no fallback replica.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::client::ReplicaClient;
use crate::message::{ClientRequest, Reply};
use crate::server::Service;

pub struct Coordinator {
    replicas: Vec<ReplicaClient>,
    counter: AtomicU64,
}

impl Coordinator {
    /// `replicas` must be non-empty; [`crate::config::CoordinatorConfig`]
    /// guarantees at least three.
    pub fn new(replicas: Vec<ReplicaClient>) -> Self {
        Self {
            replicas,
            counter: AtomicU64::new(0),
        }
    }

    /// Advances the shared counter and returns the index it selects, or
    /// `None` when there is nothing to route to.
    ///
    /// The counter is incremented before use, so the first request lands on
    /// index `1 % len`.
    fn next_index(&self) -> Option<usize> {
        if self.replicas.is_empty() {
            return None;
        }
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Some((ticket % self.replicas.len() as u64) as usize)
    }

    /// Routes one client request and returns the replica's reply unchanged.
    pub async fn route(&self, request: ClientRequest) -> Reply {
        let Some(index) = self.next_index() else {
            return Reply::error("no replicas configured");
        };
        let replica = &self.replicas[index];
        debug!(replica = replica.addr(), ?request, "routing request");

        match replica.forward(&request.into_replica_request()).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(replica = replica.addr(), error = ?err, "replica request failed");
                Reply::error(format!("{err:#}"))
            }
        }
    }
}

impl Service for Coordinator {
    type Request = ClientRequest;

    fn handle(&self, request: ClientRequest) -> impl Future<Output = Reply> + Send {
        self.route(request)
    }
}
