use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use causal_kv::{
    cli::{Cli, Command, CoordinatorArgs, ReplicaArgs},
    client::ReplicaClient,
    config::{CoordinatorConfig, ReplicaConfig},
    coordinator::Coordinator,
    engine::{Peer, ReplicationEngine},
    replica::ReplicaService,
    server::Server,
    store::ReplicaStore,
    tools,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Replica(args) => run_replica(args).await?,
        Command::Coordinator(args) => run_coordinator(args).await?,
        Command::Client(args) => tools::run(args).await?,
    }

    Ok(())
}

async fn run_replica(args: ReplicaArgs) -> Result<()> {
    let config = ReplicaConfig::new(
        args.id,
        args.listen,
        args.peers,
        Duration::from_millis(args.timeout_ms),
    )?;
    let cluster_size = config.cluster_size();

    let peers: Vec<Arc<dyn Peer>> = config
        .peers
        .iter()
        .map(|addr| {
            Arc::new(ReplicaClient::new(addr.clone(), cluster_size, config.timeout)) as Arc<dyn Peer>
        })
        .collect();
    let store = ReplicaStore::new(config.id, cluster_size);
    let engine = Arc::new(ReplicationEngine::new(store, peers));

    let listener = TcpListener::bind(config.listen).await?;
    let server = Server::new(listener, Arc::new(ReplicaService::new(engine)));
    info!(
        replica = %config.id,
        addr = %server.local_addr()?,
        peers = ?config.peers,
        "replica listening"
    );
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("replica exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}

async fn run_coordinator(args: CoordinatorArgs) -> Result<()> {
    let config = CoordinatorConfig::new(
        args.listen,
        args.replicas,
        Duration::from_millis(args.timeout_ms),
    )?;
    let cluster_size = config.cluster_size();
    let replicas = config
        .replicas
        .iter()
        .map(|addr| ReplicaClient::new(addr.clone(), cluster_size, config.timeout))
        .collect();

    let listener = TcpListener::bind(config.listen).await?;
    let server = Server::new(listener, Arc::new(Coordinator::new(replicas)));
    info!(addr = %server.local_addr()?, replicas = ?config.replicas, "coordinator listening");
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("coordinator exited with error: {err:?}");
        return Err(err);
    }
    Ok(())
}
