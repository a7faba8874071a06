//! The replica's peer/local service.

use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::engine::ReplicationEngine;
use crate::message::{ReplicaRequest, Reply};
use crate::server::Service;

pub struct ReplicaService {
    engine: Arc<ReplicationEngine>,
}

impl ReplicaService {
    pub fn new(engine: Arc<ReplicationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ReplicationEngine {
        &self.engine
    }

    /// Answers one request. Must run inside a Tokio runtime because writes
    /// spawn propagation tasks.
    pub fn dispatch(&self, request: ReplicaRequest) -> Reply {
        match request {
            ReplicaRequest::GetLocal { key } => match self.engine.get(&key) {
                Some(entry) => Reply::Lookup {
                    found: true,
                    value: Some(entry.value),
                    clock: Some(entry.clock.encode()),
                },
                None => Reply::Lookup {
                    found: false,
                    value: None,
                    clock: None,
                },
            },
            ReplicaRequest::PutLocal { key, value } => Reply::Written {
                clock: self.engine.put(key, value).encode(),
            },
            ReplicaRequest::DeleteLocal { key } => Reply::Written {
                clock: self.engine.delete(key).encode(),
            },
            ReplicaRequest::Propagate { mutation } => {
                let cluster_size = self.engine.store().cluster_size();
                match mutation.into_mutation(cluster_size) {
                    Ok(mutation) => Reply::Ack {
                        clock: self.engine.receive(mutation).encode(),
                    },
                    Err(err) => {
                        warn!(replica = %self.engine.id(), error = %err, "rejected malformed mutation");
                        Reply::error(err.to_string())
                    }
                }
            }
            ReplicaRequest::Status => {
                let store = self.engine.store();
                Reply::Status {
                    replica: self.engine.id().index(),
                    clock: store.clock().encode(),
                    keys: store.snapshot().into_keys().collect(),
                }
            }
        }
    }
}

impl Service for ReplicaService {
    type Request = ReplicaRequest;

    fn handle(&self, request: ReplicaRequest) -> impl Future<Output = Reply> + Send {
        let reply = self.dispatch(request);
        async move { reply }
    }
}
