//! Connection acceptor: bind, capacity gate, optional TLS handshake, session spawn

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use tacrelay_broadcaster::{ClientId, ClientRegistry, Message};

use crate::config::{RelayConfig, Transport};
use crate::session::{self, SessionConfig};
use crate::tls;
use crate::udp;

/// The bound relay server. `bind` performs every fallible startup step (bind
/// failures and TLS-material failures are fatal by design); `run` then only
/// faces per-connection errors, which are logged and survived.
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<ClientRegistry>,
    inbound_tx: mpsc::UnboundedSender<(ClientId, Message)>,
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    udp_socket: Option<UdpSocket>,
}

impl RelayServer {
    pub async fn bind(
        config: RelayConfig,
        registry: Arc<ClientRegistry>,
        inbound_tx: mpsc::UnboundedSender<(ClientId, Message)>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr())
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;

        let tls_acceptor = match &config.transport {
            Transport::Plain => None,
            Transport::Tls(settings) => {
                Some(tls::build_acceptor(settings).context("Failed to load TLS material")?)
            }
        };

        let udp_socket = match config.udp_bind_addr() {
            Some(addr) => Some(
                UdpSocket::bind(&addr)
                    .await
                    .with_context(|| format!("Failed to bind UDP {addr}"))?,
            ),
            None => None,
        };

        Ok(Self {
            config,
            registry,
            inbound_tx,
            listener,
            tls_acceptor,
            udp_socket,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("listener address")
    }

    pub fn udp_local_addr(&self) -> Option<SocketAddr> {
        self.udp_socket
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Accept loop. Runs until the task is dropped; per-connection failures
    /// never end it.
    pub async fn run(self) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            tls = self.tls_acceptor.is_some(),
            max_clients = self.config.max_clients,
            "relay listening"
        );

        if let Some(socket) = self.udp_socket {
            // UDP ingest gets its own ClientId so sender-exclusion applies;
            // it never registers an outbound queue, so it never receives.
            let ingest_id = self.registry.allocate_id();
            tokio::spawn(udp::ingest_loop(socket, ingest_id, self.inbound_tx.clone()));
        }

        let session_config = SessionConfig::from(&self.config);
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    if self.registry.len().await >= self.config.max_clients {
                        warn!(
                            %peer_addr,
                            max_clients = self.config.max_clients,
                            "at capacity, refusing connection"
                        );
                        drop(stream);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);

                    match &self.tls_acceptor {
                        None => {
                            start_session(
                                stream,
                                peer_addr,
                                Arc::clone(&self.registry),
                                self.inbound_tx.clone(),
                                session_config.clone(),
                                self.config.outbound_queue_depth,
                            )
                            .await;
                        }
                        Some(acceptor) => {
                            // Handshake off the accept loop so a stalling
                            // peer cannot block admission of others
                            let acceptor = acceptor.clone();
                            let registry = Arc::clone(&self.registry);
                            let inbound_tx = self.inbound_tx.clone();
                            let session_config = session_config.clone();
                            let depth = self.config.outbound_queue_depth;
                            tokio::spawn(async move {
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        start_session(
                                            tls_stream,
                                            peer_addr,
                                            registry,
                                            inbound_tx,
                                            session_config,
                                            depth,
                                        )
                                        .await;
                                    }
                                    Err(e) => {
                                        warn!(%peer_addr, "TLS handshake failed: {e}");
                                    }
                                }
                            });
                        }
                    }
                }
                Err(e) => {
                    warn!("accept error: {e}");
                }
            }
        }
    }
}

async fn start_session<S>(
    stream: S,
    peer_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    inbound_tx: mpsc::UnboundedSender<(ClientId, Message)>,
    session_config: SessionConfig,
    outbound_queue_depth: usize,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = registry.allocate_id();
    let (outbound_tx, outbound_rx) = mpsc::channel(outbound_queue_depth);
    if let Err(e) = registry.register(id, outbound_tx).await {
        warn!(%peer_addr, "failed to register session: {e}");
        return;
    }
    info!(%id, %peer_addr, "session started");
    session::spawn(stream, id, registry, inbound_tx, outbound_rx, session_config);
}
