//! RPC stubs for talking to replicas and to the coordinator.
//!
//! Every call opens a fresh TCP connection, writes one request, reads one
//! reply and closes. The whole exchange is bounded by the client's timeout.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use futures::{FutureExt, future::BoxFuture};
use serde::Serialize;
use tokio::{io::BufReader, net::TcpStream, time::timeout};

use crate::clock::VectorClock;
use crate::engine::Peer;
use crate::message::{ClientRequest, ReplicaRequest, Reply, WireMutation, read_message, write_message};
use crate::store::{Mutation, StoredEntry};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends `request` to `addr` and returns the raw reply.
///
/// Connectivity failures and timeouts are errors; an `error` reply is
/// returned as-is so that routers can pass it through untouched.
pub async fn call<T: Serialize>(addr: &str, request: &T, limit: Duration) -> Result<Reply> {
    timeout(limit, exchange(addr, request))
        .await
        .with_context(|| format!("request to {addr} timed out after {limit:?}"))?
}

async fn exchange<T: Serialize>(addr: &str, request: &T) -> Result<Reply> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    write_message(&mut writer, request)
        .await
        .with_context(|| format!("failed to send request to {addr}"))?;
    read_message::<_, Reply>(&mut reader)
        .await
        .with_context(|| format!("failed to read reply from {addr}"))?
        .ok_or_else(|| anyhow!("{addr} closed the connection without replying"))
}

/// Result of a `get` against a replica or the coordinator.
pub type Lookup = Option<StoredEntry>;

/// Snapshot of a replica's state as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub replica: usize,
    pub clock: VectorClock,
    pub keys: Vec<String>,
}

fn decode_lookup(reply: Reply, cluster_size: usize) -> Result<Lookup> {
    match reply {
        Reply::Lookup { found: false, .. } => Ok(None),
        Reply::Lookup {
            found: true,
            value,
            clock,
        } => {
            let value = value.ok_or_else(|| anyhow!("lookup reply is missing its value"))?;
            let clock = clock.ok_or_else(|| anyhow!("lookup reply is missing its clock"))?;
            Ok(Some(StoredEntry {
                value,
                clock: VectorClock::decode(&clock, cluster_size)?,
            }))
        }
        other => unexpected(other),
    }
}

fn decode_written(reply: Reply, cluster_size: usize) -> Result<VectorClock> {
    match reply {
        Reply::Written { clock } => Ok(VectorClock::decode(&clock, cluster_size)?),
        other => unexpected(other),
    }
}

fn unexpected<T>(reply: Reply) -> Result<T> {
    match reply {
        Reply::Error { message } => bail!("remote error: {message}"),
        other => bail!("unexpected reply: {other:?}"),
    }
}

/// Client for a single replica's peer/local service.
#[derive(Debug, Clone)]
pub struct ReplicaClient {
    addr: String,
    cluster_size: usize,
    timeout: Duration,
}

impl ReplicaClient {
    pub fn new(addr: impl Into<String>, cluster_size: usize, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            cluster_size,
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends a request and hands back the reply without interpreting it.
    pub async fn forward(&self, request: &ReplicaRequest) -> Result<Reply> {
        call(&self.addr, request, self.timeout).await
    }

    pub async fn get_local(&self, key: &str) -> Result<Lookup> {
        let reply = self
            .forward(&ReplicaRequest::GetLocal {
                key: key.to_string(),
            })
            .await?;
        decode_lookup(reply, self.cluster_size)
    }

    pub async fn put_local(&self, key: &str, value: Vec<u8>) -> Result<VectorClock> {
        let reply = self
            .forward(&ReplicaRequest::PutLocal {
                key: key.to_string(),
                value,
            })
            .await?;
        decode_written(reply, self.cluster_size)
    }

    pub async fn delete_local(&self, key: &str) -> Result<VectorClock> {
        let reply = self
            .forward(&ReplicaRequest::DeleteLocal {
                key: key.to_string(),
            })
            .await?;
        decode_written(reply, self.cluster_size)
    }

    pub async fn send_mutation(&self, mutation: &Mutation) -> Result<VectorClock> {
        let reply = self
            .forward(&ReplicaRequest::Propagate {
                mutation: WireMutation::from(mutation),
            })
            .await?;
        match reply {
            Reply::Ack { clock } => Ok(VectorClock::decode(&clock, self.cluster_size)?),
            other => unexpected(other),
        }
    }

    pub async fn status(&self) -> Result<ReplicaStatus> {
        match self.forward(&ReplicaRequest::Status).await? {
            Reply::Status {
                replica,
                clock,
                keys,
            } => Ok(ReplicaStatus {
                replica,
                clock: VectorClock::decode(&clock, self.cluster_size)?,
                keys,
            }),
            other => unexpected(other),
        }
    }
}

impl Peer for ReplicaClient {
    fn name(&self) -> &str {
        &self.addr
    }

    fn propagate(&self, mutation: Mutation) -> BoxFuture<'static, Result<VectorClock>> {
        let client = self.clone();
        async move { client.send_mutation(&mutation).await }.boxed()
    }
}

/// Client for the coordinator's public service.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    addr: String,
    cluster_size: usize,
    timeout: Duration,
}

impl CoordinatorClient {
    pub fn new(addr: impl Into<String>, cluster_size: usize, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            cluster_size,
            timeout,
        }
    }

    async fn send(&self, request: ClientRequest) -> Result<Reply> {
        call(&self.addr, &request, self.timeout).await
    }

    pub async fn get(&self, key: &str) -> Result<Lookup> {
        let reply = self
            .send(ClientRequest::Get {
                key: key.to_string(),
            })
            .await?;
        decode_lookup(reply, self.cluster_size)
    }

    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<VectorClock> {
        let reply = self
            .send(ClientRequest::Put {
                key: key.to_string(),
                value,
                clock: None,
            })
            .await?;
        decode_written(reply, self.cluster_size)
    }

    pub async fn delete(&self, key: &str) -> Result<VectorClock> {
        let reply = self
            .send(ClientRequest::Delete {
                key: key.to_string(),
                clock: None,
            })
            .await?;
        decode_written(reply, self.cluster_size)
    }
}
