//! JSON line protocol spoken by replicas, the coordinator, and clients.
//!
//! Each frame is one JSON document terminated by `\n`. Clocks travel as their
//! raw `8 * N` byte encoding and are decoded by whoever knows `N`.

use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::clock::{ClockError, VectorClock};
use crate::store::{Mutation, MutationKind, Write};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("PUT mutation for key '{0}' carries no value")]
    MissingValue(String),
    #[error("DELETE mutation for key '{0}' must not carry a value")]
    UnexpectedValue(String),
    #[error(transparent)]
    Clock(#[from] ClockError),
}

/// Mutation record as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMutation {
    pub kind: MutationKind,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    pub clock: Vec<u8>,
}

impl WireMutation {
    pub fn into_mutation(self, cluster_size: usize) -> Result<Mutation, WireError> {
        let clock = VectorClock::decode(&self.clock, cluster_size)?;
        let write = match (self.kind, self.value) {
            (MutationKind::Put, Some(value)) => Write::Put {
                key: self.key,
                value,
            },
            (MutationKind::Put, None) => return Err(WireError::MissingValue(self.key)),
            (MutationKind::Delete, None) => Write::Delete { key: self.key },
            (MutationKind::Delete, Some(_)) => return Err(WireError::UnexpectedValue(self.key)),
        };
        Ok(Mutation { write, clock })
    }
}

impl From<&Mutation> for WireMutation {
    fn from(mutation: &Mutation) -> Self {
        let (key, value) = match &mutation.write {
            Write::Put { key, value } => (key.clone(), Some(value.clone())),
            Write::Delete { key } => (key.clone(), None),
        };
        Self {
            kind: mutation.write.kind(),
            key,
            value,
            clock: mutation.clock.encode(),
        }
    }
}

/// Requests served by a replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicaRequest {
    GetLocal { key: String },
    PutLocal { key: String, value: Vec<u8> },
    DeleteLocal { key: String },
    Propagate { mutation: WireMutation },
    Status,
}

/// Requests served by the coordinator.
///
/// Clocks supplied by clients on `put` and `delete` are accepted and ignored;
/// the replica's clock is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Get {
        key: String,
    },
    Put {
        key: String,
        value: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clock: Option<Vec<u8>>,
    },
    Delete {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clock: Option<Vec<u8>>,
    },
}

impl ClientRequest {
    /// The replica request a coordinator forwards for this client request.
    pub fn into_replica_request(self) -> ReplicaRequest {
        match self {
            ClientRequest::Get { key } => ReplicaRequest::GetLocal { key },
            ClientRequest::Put { key, value, .. } => ReplicaRequest::PutLocal { key, value },
            ClientRequest::Delete { key, .. } => ReplicaRequest::DeleteLocal { key },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Lookup {
        found: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Vec<u8>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clock: Option<Vec<u8>>,
    },
    Written {
        clock: Vec<u8>,
    },
    Ack {
        clock: Vec<u8>,
    },
    Status {
        replica: usize,
        clock: Vec<u8>,
        keys: Vec<String>,
    },
    Error {
        message: String,
    },
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
        }
    }
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
