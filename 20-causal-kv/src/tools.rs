//! Operator commands for poking at a running cluster.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{self, AsyncWriteExt};
use tracing::warn;

use crate::{
    cli::{ClientAction, ClientArgs},
    client::{CoordinatorClient, Lookup, ReplicaClient},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let limit = Duration::from_millis(args.timeout_ms);
    let coordinator = CoordinatorClient::new(args.server.clone(), args.replicas, limit);

    match args.action {
        ClientAction::Get { key } => {
            let found = coordinator.get(&key).await?;
            write_stdout(&describe_lookup(&key, &found)).await?;
        }
        ClientAction::Put { key, value } => {
            let clock = coordinator.put(&key, value.into_bytes()).await?;
            write_stdout(&format!("put {key} -> clock {clock}")).await?;
        }
        ClientAction::Delete { key } => {
            let clock = coordinator.delete(&key).await?;
            write_stdout(&format!("delete {key} -> clock {clock}")).await?;
        }
        ClientAction::Walkthrough { key, value } => walkthrough(&coordinator, &key, value).await?,
        ClientAction::Conflict { key, first, second } => {
            let first = ReplicaClient::new(first, args.replicas, limit);
            let second = ReplicaClient::new(second, args.replicas, limit);
            conflict(&first, &second, &key).await?;
        }
        ClientAction::Inspect { key, replicas } => {
            for addr in replicas {
                let replica = ReplicaClient::new(addr, args.replicas, limit);
                match replica.get_local(&key).await {
                    Ok(found) => {
                        write_stdout(&format!("[{}] {}", replica.addr(), describe_lookup(&key, &found)))
                            .await?
                    }
                    Err(err) => {
                        write_stderr(&format!("[{}] error: {err:#}", replica.addr())).await?
                    }
                }
            }
        }
    }

    Ok(())
}

async fn walkthrough(coordinator: &CoordinatorClient, key: &str, value: String) -> Result<()> {
    let clock = coordinator
        .put(key, value.into_bytes())
        .await
        .context("put failed")?;
    write_stdout(&format!("put {key} -> clock {clock}")).await?;

    let found = coordinator.get(key).await.context("get failed")?;
    write_stdout(&describe_lookup(key, &found)).await?;

    let clock = coordinator.delete(key).await.context("delete failed")?;
    write_stdout(&format!("delete {key} -> clock {clock}")).await?;

    // Routing may land on a replica that has not seen the delete yet.
    let after = coordinator.get(key).await.context("final get failed")?;
    write_stdout(&describe_lookup(key, &after)).await?;
    Ok(())
}

async fn conflict(first: &ReplicaClient, second: &ReplicaClient, key: &str) -> Result<()> {
    let (a, b) = tokio::join!(
        first.put_local(key, b"valorA".to_vec()),
        second.put_local(key, b"valorB".to_vec()),
    );
    for (replica, result, value) in [(first, a, "valorA"), (second, b, "valorB")] {
        match result {
            Ok(clock) => {
                write_stdout(&format!("[{}] put {key}={value} -> clock {clock}", replica.addr())).await?
            }
            Err(err) => warn!(replica = replica.addr(), error = ?err, "conflicting put failed"),
        }
    }
    Ok(())
}

fn describe_lookup(key: &str, found: &Lookup) -> String {
    match found {
        Some(entry) => format!(
            "{key} = {} (clock {})",
            String::from_utf8_lossy(&entry.value),
            entry.clock
        ),
        None => format!("{key} not found"),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
