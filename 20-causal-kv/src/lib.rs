//! Causally replicated key-value store.
//!
//! A fixed set of replicas each hold a full copy of the data. Clients talk to
//! a coordinator that forwards every request to one replica in round-robin
//! order. The replica applies the write, stamps it with a vector clock and
//! propagates it to its peers in the background. Peers apply a replicated
//! write only if their own entry for that key causally precedes it.
//!
//! Concurrent writes to the same key are not merged: each replica keeps
//! whatever it held when the conflict arrived, so replicas can end up with
//! different values while their clocks converge. There is no anti-entropy
//! pass, so a peer that misses a propagation stays behind until a newer
//! write for the same key reaches it.
//!
//! # Modules
//!
//! - [`clock`]: vector clocks and their fixed-width encoding
//! - [`store`]: per-replica map and clock behind one mutex
//! - [`engine`]: local writes, fan-out, and reconciliation of peer writes
//! - [`message`]: JSON line wire protocol
//! - [`server`]: accept loop shared by replicas and the coordinator
//! - [`client`]: RPC stubs for replicas and the coordinator
//! - [`replica`]: the replica service
//! - [`coordinator`]: the round-robin router
//! - [`config`]: validated startup configuration
//! - [`cli`] and [`tools`]: command line and operator commands

pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod message;
pub mod replica;
pub mod server;
pub mod store;
pub mod tools;
