use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    hub::HubHandle,
    session::{self, Liveness, SessionConfig},
};

/// Accept loop feeding the hub: one session task per inbound connection.
///
/// The hub dispatcher is constructed at startup and handed in here; the
/// server only ever talks to it through the handle.
pub struct Server {
    listener: TcpListener,
    hub: HubHandle,
    config: SessionConfig,
}

impl Server {
    pub fn new(listener: TcpListener, hub: HubHandle) -> Self {
        Self {
            listener,
            hub,
            config: SessionConfig::default(),
        }
    }

    /// Overrides the liveness timing for every session this server accepts.
    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.config.liveness = liveness;
        self
    }

    /// Overrides the per-client outbound queue capacity.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = capacity;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            hub,
            config,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    // A payload without the sender delimiter renders as a
                    // system notice on the client side.
                    hub.broadcast("server shutting down".to_string()).await;
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => spawn_session(stream, peer, &hub, config),
                    Err(err) => warn!(error = ?err, "failed to accept connection"),
                },
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, hub: &HubHandle, config: SessionConfig) {
    let hub = hub.clone();
    tokio::spawn(async move {
        if let Err(err) = session::run(stream, hub, config).await {
            warn!(peer = %peer, error = ?err, "session closed with error");
        }
    });
}
