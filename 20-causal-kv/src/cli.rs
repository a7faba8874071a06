use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a replica that stores keys and propagates writes to its peers.
    Replica(ReplicaArgs),
    /// Run the round-robin coordinator in front of the replicas.
    Coordinator(CoordinatorArgs),
    /// Talk to a running cluster.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReplicaArgs {
    /// Replica identity in [0, N), where N is the number of peers plus one.
    #[arg(long)]
    pub id: usize,

    /// Socket address the replica should bind to.
    #[arg(long, default_value = "127.0.0.1:50051")]
    pub listen: SocketAddr,

    /// Addresses of the other replicas, repeatable or comma separated.
    #[arg(long = "peer", value_delimiter = ',', required = true)]
    pub peers: Vec<String>,

    /// Timeout for each outbound propagation call, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct CoordinatorArgs {
    /// Socket address the coordinator should bind to.
    #[arg(long, default_value = "127.0.0.1:6000")]
    pub listen: SocketAddr,

    /// Addresses of every replica, repeatable or comma separated.
    #[arg(long = "replica", value_delimiter = ',', required = true)]
    pub replicas: Vec<String>,

    /// Timeout for each forwarded call, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Coordinator address.
    #[arg(long, default_value = "127.0.0.1:6000")]
    pub server: String,

    /// Cluster size, used to decode vector clocks.
    #[arg(long, default_value_t = 3)]
    pub replicas: usize,

    /// Timeout for each call, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub action: ClientAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ClientAction {
    /// Read a key through the coordinator.
    Get { key: String },
    /// Write a key through the coordinator.
    Put { key: String, value: String },
    /// Delete a key through the coordinator.
    Delete { key: String },
    /// Put, get, delete, and get again on one key.
    Walkthrough {
        #[arg(default_value = "usuario123")]
        key: String,
        #[arg(default_value = "datosImportantes")]
        value: String,
    },
    /// Write two different values for one key on two replicas at once.
    Conflict {
        #[arg(long, default_value = "conflictoX")]
        key: String,
        #[arg(long, default_value = "127.0.0.1:50051")]
        first: String,
        #[arg(long, default_value = "127.0.0.1:50052")]
        second: String,
    },
    /// Read one key directly from every listed replica.
    Inspect {
        #[arg(long, default_value = "conflictoX")]
        key: String,
        /// Replica addresses, repeatable or comma separated.
        #[arg(
            long = "replica",
            value_delimiter = ',',
            default_values = ["127.0.0.1:50051", "127.0.0.1:50052", "127.0.0.1:50053"]
        )]
        replicas: Vec<String>,
    },
}
