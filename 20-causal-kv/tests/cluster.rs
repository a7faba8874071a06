//! End-to-end tests over TCP: three replicas and a coordinator on localhost.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, bail};
use causal_kv::{
    client::{CoordinatorClient, DEFAULT_TIMEOUT, ReplicaClient, call},
    clock::{ReplicaId, VectorClock},
    coordinator::Coordinator,
    engine::{Peer, ReplicationEngine},
    message::{ReplicaRequest, Reply, WireMutation},
    replica::ReplicaService,
    server::{Server, Service},
    store::{MutationKind, ReplicaStore},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};

const CLUSTER_SIZE: usize = 3;

/// Running server plus the means to stop it.
struct Running {
    addr: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

fn serve<S: Service>(listener: TcpListener, service: Arc<S>) -> Result<Running> {
    let server = Server::new(listener, service);
    let addr = server.local_addr()?.to_string();
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });
    Ok(Running {
        addr,
        shutdown,
        task,
    })
}

struct TestCluster {
    replicas: Vec<Running>,
    engines: Vec<Arc<ReplicationEngine>>,
    coordinator: Running,
}

impl TestCluster {
    async fn spawn() -> Result<Self> {
        // Bind everything first so every replica knows its peers' addresses.
        let mut listeners = Vec::new();
        let mut addrs = Vec::new();
        for _ in 0..CLUSTER_SIZE {
            let listener = TcpListener::bind("127.0.0.1:0").await?;
            addrs.push(listener.local_addr()?.to_string());
            listeners.push(listener);
        }

        let mut replicas = Vec::new();
        let mut engines = Vec::new();
        for (id, listener) in listeners.into_iter().enumerate() {
            let peers: Vec<Arc<dyn Peer>> = addrs
                .iter()
                .enumerate()
                .filter(|(peer_id, _)| *peer_id != id)
                .map(|(_, addr)| {
                    Arc::new(ReplicaClient::new(addr.clone(), CLUSTER_SIZE, DEFAULT_TIMEOUT)) as Arc<dyn Peer>
                })
                .collect();
            let store = ReplicaStore::new(ReplicaId::new(id, CLUSTER_SIZE)?, CLUSTER_SIZE);
            let engine = Arc::new(ReplicationEngine::new(store, peers));
            replicas.push(serve(listener, Arc::new(ReplicaService::new(Arc::clone(&engine))))?);
            engines.push(engine);
        }

        let clients = addrs
            .iter()
            .map(|addr| ReplicaClient::new(addr.clone(), CLUSTER_SIZE, DEFAULT_TIMEOUT))
            .collect();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let coordinator = serve(listener, Arc::new(Coordinator::new(clients)))?;

        Ok(Self {
            replicas,
            engines,
            coordinator,
        })
    }

    fn replica(&self, id: usize) -> ReplicaClient {
        ReplicaClient::new(self.replicas[id].addr.clone(), CLUSTER_SIZE, DEFAULT_TIMEOUT)
    }

    fn coordinator(&self) -> CoordinatorClient {
        CoordinatorClient::new(self.coordinator.addr.clone(), CLUSTER_SIZE, DEFAULT_TIMEOUT)
    }

    /// Polls until every replica holds `expected` for `key` (or lacks it for `None`).
    async fn wait_for_value(&self, key: &str, expected: Option<&[u8]>) -> Result<()> {
        for _ in 0..100 {
            let converged = self
                .engines
                .iter()
                .all(|engine| engine.get(key).map(|entry| entry.value).as_deref() == expected);
            if converged {
                return Ok(());
            }
            sleep(Duration::from_millis(20)).await;
        }
        bail!("replicas did not converge on {key}");
    }

    async fn shutdown(self) {
        self.coordinator.stop().await;
        for replica in self.replicas {
            replica.stop().await;
        }
    }
}

fn clock(slots: &[u64]) -> VectorClock {
    VectorClock::from_slots(slots.to_vec())
}

#[tokio::test]
async fn local_walkthrough_on_replica_zero() -> Result<()> {
    let cluster = TestCluster::spawn().await?;
    let r0 = cluster.replica(0);

    assert_eq!(r0.put_local("u1", b"v1".to_vec()).await?, clock(&[1, 0, 0]));

    let entry = r0.get_local("u1").await?.expect("u1 stored");
    assert_eq!(entry.value, b"v1");
    assert_eq!(entry.clock, clock(&[1, 0, 0]));

    assert_eq!(r0.delete_local("u1").await?, clock(&[2, 0, 0]));
    assert_eq!(r0.get_local("u1").await?, None);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn writes_propagate_to_every_replica() -> Result<()> {
    let cluster = TestCluster::spawn().await?;

    let written = cluster.replica(1).put_local("k", b"v".to_vec()).await?;
    assert_eq!(written, clock(&[0, 1, 0]));
    cluster.wait_for_value("k", Some(b"v".as_slice())).await?;

    for id in 0..CLUSTER_SIZE {
        let status = cluster.replica(id).status().await?;
        assert_eq!(status.replica, id);
        assert_eq!(status.keys, vec!["k".to_string()]);
        assert!(!status.clock.precedes(&written));
    }

    cluster.replica(2).delete_local("k").await?;
    cluster.wait_for_value("k", None).await?;

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn coordinator_routes_round_robin() -> Result<()> {
    let cluster = TestCluster::spawn().await?;
    let coordinator = cluster.coordinator();

    // The shared counter is bumped before use: replicas 1, 2, 0 in turn.
    assert_eq!(coordinator.put("a", b"1".to_vec()).await?, clock(&[0, 1, 0]));
    cluster.wait_for_value("a", Some(b"1".as_slice())).await?;
    let second = coordinator.put("b", b"2".to_vec()).await?;
    assert_eq!(second.get(ReplicaId::new(2, CLUSTER_SIZE)?), 1);
    cluster.wait_for_value("b", Some(b"2".as_slice())).await?;
    let third = coordinator.delete("a").await?;
    assert_eq!(third.get(ReplicaId::new(0, CLUSTER_SIZE)?), 1);
    cluster.wait_for_value("a", None).await?;

    // Reads draw from the same counter and are answered verbatim.
    let found = coordinator.get("b").await?.expect("b replicated");
    assert_eq!(found.value, b"2");
    assert_eq!(coordinator.get("a").await?, None);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_writes_on_two_replicas_diverge() -> Result<()> {
    let cluster = TestCluster::spawn().await?;

    // Apply both writes before either propagation is delivered.
    let a = cluster.engines[0].put("x".into(), b"A".to_vec());
    let b = cluster.engines[1].put("x".into(), b"B".to_vec());
    assert_eq!(a, clock(&[1, 0, 0]));
    assert_eq!(b, clock(&[0, 1, 0]));

    for _ in 0..100 {
        let merged = (0..2).all(|id| cluster.engines[id].store().clock() == clock(&[1, 1, 0]));
        if merged {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(cluster.engines[0].store().clock(), clock(&[1, 1, 0]));
    assert_eq!(cluster.engines[1].store().clock(), clock(&[1, 1, 0]));
    assert_eq!(cluster.replica(0).get_local("x").await?.expect("kept").value, b"A");
    assert_eq!(cluster.replica(1).get_local("x").await?.expect("kept").value, b"B");

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn malformed_clock_is_rejected_over_the_wire() -> Result<()> {
    let cluster = TestCluster::spawn().await?;

    let request = ReplicaRequest::Propagate {
        mutation: WireMutation {
            kind: MutationKind::Put,
            key: "k".into(),
            value: Some(b"v".to_vec()),
            clock: vec![0; 8],
        },
    };
    let reply = call(&cluster.replicas[0].addr, &request, DEFAULT_TIMEOUT).await?;
    assert!(matches!(reply, Reply::Error { .. }));
    assert_eq!(cluster.replica(0).get_local("k").await?, None);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn invalid_json_closes_only_that_connection() -> Result<()> {
    let cluster = TestCluster::spawn().await?;

    let stream = TcpStream::connect(&cluster.replicas[0].addr).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(b"{not json}\n").await?;
    writer.flush().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let bytes = timeout(DEFAULT_TIMEOUT, reader.read_line(&mut line)).await??;
    assert_eq!(bytes, 0, "expected EOF, got {line:?}");

    // The server keeps accepting fresh connections.
    let status = cluster.replica(0).status().await?;
    assert_eq!(status.replica, 0);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn coordinator_reports_unreachable_replica() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let dead = listener.local_addr()?.to_string();
    drop(listener);

    let limit = Duration::from_secs(1);
    let router = Coordinator::new(
        (0..CLUSTER_SIZE)
            .map(|_| ReplicaClient::new(dead.clone(), CLUSTER_SIZE, limit))
            .collect(),
    );
    let running = serve(TcpListener::bind("127.0.0.1:0").await?, Arc::new(router))?;

    let client = CoordinatorClient::new(running.addr.clone(), CLUSTER_SIZE, DEFAULT_TIMEOUT);
    let err = client.put("k", b"v".to_vec()).await.unwrap_err();
    assert!(err.to_string().contains("remote error"));
    assert!(client.get("k").await.is_err());

    running.stop().await;
    Ok(())
}
