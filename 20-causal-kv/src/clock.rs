//! Vector clocks used to timestamp every mutation.
//!
//! A clock holds one counter per replica, indexed by [`ReplicaId`]. The
//! cluster size is fixed when the cluster is formed, so every clock in a
//! deployment has the same number of slots. Only the replica that owns a
//! slot ever increments it; everything else flows in through [`VectorClock::merge`].
//!
//! The wire encoding is `8 * N` bytes: one big-endian `u64` per slot in
//! replica-id order.

use std::fmt;

use thiserror::Error;

/// Width of a single encoded slot.
pub const SLOT_BYTES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("vector clock encoding must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("replica id {id} is outside a cluster of {size} replicas")]
    ReplicaOutOfRange { id: usize, size: usize },
}

/// Dense identity of a replica inside a fixed-size cluster.
///
/// Construction checks the id against the cluster size, so a `ReplicaId`
/// can always index a clock of that size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaId(usize);

impl ReplicaId {
    pub fn new(id: usize, cluster_size: usize) -> Result<Self, ClockError> {
        if id >= cluster_size {
            return Err(ClockError::ReplicaOutOfRange {
                id,
                size: cluster_size,
            });
        }
        Ok(Self(id))
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical timestamp with one counter per replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VectorClock {
    slots: Vec<u64>,
}

impl VectorClock {
    /// All-zero clock for a cluster of `cluster_size` replicas.
    pub fn new(cluster_size: usize) -> Self {
        Self {
            slots: vec![0; cluster_size],
        }
    }

    pub fn from_slots(slots: Vec<u64>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[u64] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Counter for `replica`, zero when the clock has no such slot.
    pub fn get(&self, replica: ReplicaId) -> u64 {
        self.slot(replica.index())
    }

    fn slot(&self, index: usize) -> u64 {
        self.slots.get(index).copied().unwrap_or(0)
    }

    /// Bumps the slot owned by `owner`.
    ///
    /// Callers must hold the owning replica's mutation lock; nobody else may
    /// advance this slot.
    pub fn increment(&mut self, owner: ReplicaId) {
        let index = owner.index();
        if index >= self.slots.len() {
            self.slots.resize(index + 1, 0);
        }
        self.slots[index] += 1;
    }

    /// Slot-wise maximum with `other`. Never lowers a counter.
    pub fn merge(&mut self, other: &VectorClock) {
        if other.slots.len() > self.slots.len() {
            self.slots.resize(other.slots.len(), 0);
        }
        for (mine, theirs) in self.slots.iter_mut().zip(&other.slots) {
            *mine = (*mine).max(*theirs);
        }
    }

    /// Strict happened-before: every slot `<=` and at least one `<`.
    pub fn precedes(&self, other: &VectorClock) -> bool {
        let width = self.slots.len().max(other.slots.len());
        let mut strictly_less = false;
        for index in 0..width {
            let (mine, theirs) = (self.slot(index), other.slot(index));
            if mine > theirs {
                return false;
            }
            if mine < theirs {
                strictly_less = true;
            }
        }
        strictly_less
    }

    /// Neither clock precedes the other and they are not equal.
    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        !self.precedes(other) && !other.precedes(self) && !self.same_as(other)
    }

    fn same_as(&self, other: &VectorClock) -> bool {
        let width = self.slots.len().max(other.slots.len());
        (0..width).all(|index| self.slot(index) == other.slot(index))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.slots.len() * SLOT_BYTES);
        for slot in &self.slots {
            buf.extend_from_slice(&slot.to_be_bytes());
        }
        buf
    }

    /// Decodes exactly `cluster_size` slots. Any other length is rejected;
    /// the input is never truncated or padded.
    pub fn decode(bytes: &[u8], cluster_size: usize) -> Result<Self, ClockError> {
        let expected = cluster_size * SLOT_BYTES;
        if bytes.len() != expected {
            return Err(ClockError::InvalidLength {
                expected,
                actual: bytes.len(),
            });
        }

        let slots = bytes
            .chunks_exact(SLOT_BYTES)
            .map(|chunk| {
                let mut word = [0u8; SLOT_BYTES];
                word.copy_from_slice(chunk);
                u64::from_be_bytes(word)
            })
            .collect();
        Ok(Self { slots })
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (index, slot) in self.slots.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            write!(f, "{slot}")?;
        }
        write!(f, ")")
    }
}
