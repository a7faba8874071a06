//! In-memory key-value storage for a single replica.
//!
//! Every entry carries the vector clock of the write that produced it, and
//! the store owns the replica's own clock. Reads and writes all go through
//! one mutex; the critical sections only touch the map and the clock, never
//! the network.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::clock::{ReplicaId, VectorClock};

/// A value together with the clock of the write that stored it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub value: Vec<u8>,
    pub clock: VectorClock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationKind {
    Put,
    Delete,
}

/// A state change without its timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl Write {
    pub fn key(&self) -> &str {
        match self {
            Write::Put { key, .. } | Write::Delete { key } => key,
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Write::Put { .. } => MutationKind::Put,
            Write::Delete { .. } => MutationKind::Delete,
        }
    }
}

/// A causally stamped write: the unit of replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub write: Write,
    pub clock: VectorClock,
}

impl Mutation {
    pub fn key(&self) -> &str {
        self.write.key()
    }
}

/// What [`ReplicaStore::reconcile`] decided about an incoming mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The key was absent or the incoming clock strictly follows the local one.
    Applied,
    /// The local entry is concurrent with, equal to, or newer than the incoming one.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Local clock after merging the incoming clock.
    pub ack: VectorClock,
    pub verdict: Verdict,
}

struct StoreState {
    entries: BTreeMap<String, StoredEntry>,
    clock: VectorClock,
}

/// Authoritative local state of one replica.
///
/// A plain `Mutex` rather than an `RwLock`: `get` must never observe a
/// half-applied entry, and the critical sections are tiny compared to a
/// network round trip.
pub struct ReplicaStore {
    id: ReplicaId,
    state: Mutex<StoreState>,
}

impl ReplicaStore {
    /// Creates an empty store whose clock starts at all zeros.
    pub fn new(id: ReplicaId, cluster_size: usize) -> Self {
        Self {
            id,
            state: Mutex::new(StoreState {
                entries: BTreeMap::new(),
                clock: VectorClock::new(cluster_size),
            }),
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn cluster_size(&self) -> usize {
        self.lock().clock.len()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // The state is never left half-written across a panic point, so a
        // poisoned lock still guards consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<StoredEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Current replica clock.
    pub fn clock(&self) -> VectorClock {
        self.lock().clock.clone()
    }

    /// Applies a write that originated on this replica.
    ///
    /// This is the only path that increments the local slot. The returned
    /// mutation carries the post-increment clock and is what gets fanned out
    /// to peers.
    pub fn apply_local(&self, write: Write) -> Mutation {
        let mut state = self.lock();
        state.clock.increment(self.id);
        let clock = state.clock.clone();

        match &write {
            Write::Put { key, value } => {
                state.entries.insert(
                    key.clone(),
                    StoredEntry {
                        value: value.clone(),
                        clock: clock.clone(),
                    },
                );
            }
            Write::Delete { key } => {
                state.entries.remove(key);
            }
        }

        Mutation { write, clock }
    }

    /// Runs the acceptance test on a mutation received from a peer.
    ///
    /// The write takes effect only when the key is absent locally or the
    /// local entry's clock strictly precedes the incoming clock. Concurrent
    /// writes are dropped without any record. The incoming clock is merged
    /// into the replica clock either way.
    pub fn reconcile(&self, mutation: &Mutation) -> Reconciliation {
        let mut state = self.lock();

        let accept = match state.entries.get(mutation.key()) {
            None => true,
            Some(local) => local.clock.precedes(&mutation.clock),
        };

        if accept {
            match &mutation.write {
                Write::Put { key, value } => {
                    state.entries.insert(
                        key.clone(),
                        StoredEntry {
                            value: value.clone(),
                            clock: mutation.clock.clone(),
                        },
                    );
                }
                Write::Delete { key } => {
                    state.entries.remove(key);
                }
            }
        }

        state.clock.merge(&mutation.clock);

        Reconciliation {
            ack: state.clock.clone(),
            verdict: if accept {
                Verdict::Applied
            } else {
                Verdict::Dropped
            },
        }
    }

    /// Returns a copy of every stored entry, in key order.
    ///
    /// Clones the map so the lock is not held while the caller iterates.
    pub fn snapshot(&self) -> BTreeMap<String, StoredEntry> {
        self.lock().entries.clone()
    }
}
