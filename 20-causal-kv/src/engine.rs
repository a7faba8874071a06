//! Local apply and best-effort propagation of mutations.
//!
//! # Write path
//!
//! A write that arrives at this replica is stamped by [`ReplicaStore::apply_local`]
//! and answered right away. Propagation happens afterwards: one detached Tokio
//! task per peer, each making a single attempt. Nothing waits on those tasks,
//! nothing retries them, and a peer that misses a mutation only catches up if
//! it later receives a causally newer write for the same key.
//!
//! # Receive path
//!
//! Mutations from peers go through [`ReplicaStore::reconcile`]. A concurrent
//! write is dropped silently (logged at `debug`); the caller only ever sees
//! the ack clock.

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::clock::{ReplicaId, VectorClock};
use crate::store::{Mutation, ReplicaStore, StoredEntry, Verdict, Write};

/// Outbound link to one peer replica.
pub trait Peer: Send + Sync + 'static {
    /// Human-readable peer name for logs, usually its address.
    fn name(&self) -> &str;

    /// Delivers `mutation` and resolves to the peer's ack clock.
    fn propagate(&self, mutation: Mutation) -> BoxFuture<'static, Result<VectorClock>>;
}

pub struct ReplicationEngine {
    store: ReplicaStore,
    peers: Vec<Arc<dyn Peer>>,
}

impl ReplicationEngine {
    pub fn new(store: ReplicaStore, peers: Vec<Arc<dyn Peer>>) -> Self {
        Self { store, peers }
    }

    pub fn id(&self) -> ReplicaId {
        self.store.id()
    }

    pub fn store(&self) -> &ReplicaStore {
        &self.store
    }

    pub fn get(&self, key: &str) -> Option<StoredEntry> {
        self.store.get(key)
    }

    /// Stores `value` locally and schedules propagation. Returns the new clock.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn put(&self, key: String, value: Vec<u8>) -> VectorClock {
        self.write_local(Write::Put { key, value })
    }

    /// Removes `key` locally and schedules propagation. Returns the new clock.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn delete(&self, key: String) -> VectorClock {
        self.write_local(Write::Delete { key })
    }

    fn write_local(&self, write: Write) -> VectorClock {
        let mutation = self.store.apply_local(write);
        info!(
            replica = %self.id(),
            key = mutation.key(),
            kind = ?mutation.write.kind(),
            clock = %mutation.clock,
            "applied local write"
        );
        let clock = mutation.clock.clone();
        self.fan_out(mutation);
        clock
    }

    /// Reconciles a mutation sent by a peer and returns the ack clock.
    pub fn receive(&self, mutation: Mutation) -> VectorClock {
        let result = self.store.reconcile(&mutation);
        match result.verdict {
            Verdict::Applied => debug!(
                replica = %self.id(),
                key = mutation.key(),
                clock = %mutation.clock,
                "applied replicated write"
            ),
            Verdict::Dropped => debug!(
                replica = %self.id(),
                key = mutation.key(),
                clock = %mutation.clock,
                "dropped replicated write that does not follow the local entry"
            ),
        }
        result.ack
    }

    fn fan_out(&self, mutation: Mutation) {
        for peer in &self.peers {
            let peer = Arc::clone(peer);
            let mutation = mutation.clone();
            // Detached: the join handle is dropped and the request never
            // waits on delivery.
            tokio::spawn(async move {
                match peer.propagate(mutation).await {
                    Ok(ack) => debug!(peer = peer.name(), ack = %ack, "propagated mutation"),
                    Err(err) => warn!(peer = peer.name(), error = ?err, "propagation failed"),
                }
            });
        }
    }
}
