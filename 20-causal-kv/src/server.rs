use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use serde::de::DeserializeOwned;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::message::{Reply, read_message, write_message};

/// Request handler plugged into a [`Server`].
pub trait Service: Send + Sync + 'static {
    type Request: DeserializeOwned + Send;

    fn handle(&self, request: Self::Request) -> impl Future<Output = Reply> + Send;
}

/// Accept loop that serves one [`Service`] over the JSON line protocol.
///
/// Every connection runs on its own task and may carry any number of
/// request/reply pairs.
pub struct Server<S> {
    listener: TcpListener,
    service: Arc<S>,
}

impl<S: Service> Server<S> {
    pub fn new(listener: TcpListener, service: Arc<S>) -> Self {
        Self { listener, service }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, service } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &service);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn handle_accept_result<S: Service>(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    service: &Arc<S>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, service),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler<S: Service>(stream: TcpStream, peer: SocketAddr, service: &Arc<S>) {
    let service = Arc::clone(service);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, service).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

async fn handle_connection<S: Service>(stream: TcpStream, service: Arc<S>) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    while let Some(request) = read_message::<_, S::Request>(&mut reader).await? {
        let reply = service.handle(request).await;
        write_message(&mut writer, &reply).await?;
    }

    debug!(?peer, "connection closed");
    Ok(())
}
