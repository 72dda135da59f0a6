//! DNS listener with TCP backpressure.
//!
//! # Responsibilities
//! - Bind UDP (and optionally TCP) on the configured address
//! - Hand every query to the forwarder on its own task
//! - Enforce `max_tcp_connections` via semaphore
//! - Turn forwarding failures into SERVFAIL or REFUSED replies

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, Semaphore};

use crate::config::ListenerConfig;
use crate::dns::{Message, Rcode, MAX_UDP_SIZE};
use crate::forward::{ForwardError, Forwarder};
use crate::upstream::transport::{read_frame, write_frame};

/// Idle TCP clients are disconnected after this long without a query.
const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid bind address '{0}'")]
    Address(String),

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
}

/// UDP and TCP front end for a [`Forwarder`].
pub struct DnsServer {
    udp: Arc<UdpSocket>,
    tcp: Option<TcpListener>,
    connection_limit: Arc<Semaphore>,
    forwarder: Arc<Forwarder>,
}

impl DnsServer {
    /// Bind the configured address. TCP shares the UDP port, so binding
    /// port 0 gives both protocols the same ephemeral port.
    pub async fn bind(config: &ListenerConfig, forwarder: Arc<Forwarder>) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;

        let udp = UdpSocket::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let bound = udp
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        let tcp = if config.tcp {
            let listener = TcpListener::bind(bound)
                .await
                .map_err(|source| ListenerError::Bind { addr: bound, source })?;
            Some(listener)
        } else {
            None
        };

        tracing::info!(
            address = %bound,
            tcp = config.tcp,
            max_tcp_connections = config.max_tcp_connections,
            "Listener bound"
        );

        Ok(Self {
            udp: Arc::new(udp),
            tcp,
            connection_limit: Arc::new(Semaphore::new(config.max_tcp_connections)),
            forwarder,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    pub fn tcp_local_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Serve until shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let tcp_task = self.tcp.map(|listener| {
            tokio::spawn(serve_tcp(
                listener,
                self.connection_limit.clone(),
                self.forwarder.clone(),
                shutdown.resubscribe(),
            ))
        });

        let udp = self.udp;
        let mut buf = vec![0u8; MAX_UDP_SIZE];
        loop {
            tokio::select! {
                received = udp.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        let bytes = buf[..len].to_vec();
                        let socket = udp.clone();
                        let forwarder = self.forwarder.clone();
                        tokio::spawn(async move {
                            if let Some(reply) = answer(&forwarder, bytes).await {
                                if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
                                    tracing::debug!(peer = %peer, error = %e, "Failed to send UDP reply");
                                }
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "UDP receive failed"),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Listener received shutdown signal, exiting loop");
                    break;
                }
            }
        }

        if let Some(task) = tcp_task {
            let _ = task.await;
        }
    }
}

async fn serve_tcp(
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
    forwarder: Arc<Forwarder>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        // Acquire permit first (backpressure)
        let permit = tokio::select! {
            permit = connection_limit.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.recv() => break,
        };

        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "TCP accept failed");
                    continue;
                }
            },
            _ = shutdown.recv() => break,
        };

        tracing::debug!(
            peer_addr = %peer,
            available_permits = connection_limit.available_permits(),
            "Connection accepted"
        );

        let forwarder = forwarder.clone();
        tokio::spawn(async move {
            let _permit = permit;
            serve_connection(stream, &forwarder).await;
        });
    }
}

/// Answer length-prefixed queries on one connection until the client leaves.
async fn serve_connection(mut stream: TcpStream, forwarder: &Forwarder) {
    loop {
        let query = match tokio::time::timeout(TCP_IDLE_TIMEOUT, read_frame(&mut stream)).await {
            Ok(Ok(query)) => query,
            Ok(Err(_)) | Err(_) => return,
        };

        let Some(reply) = answer(forwarder, query.into_bytes()).await else {
            continue;
        };
        if let Err(e) = write_frame(&mut stream, &reply).await {
            tracing::debug!(error = %e, "Failed to write TCP reply");
            return;
        }
    }
}

/// Forward one raw query. `None` means the packet does not deserve a reply.
async fn answer(forwarder: &Forwarder, bytes: Vec<u8>) -> Option<Message> {
    let query = match Message::from_bytes(bytes) {
        Ok(query) if !query.is_response() => query,
        Ok(_) => return None,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping malformed query");
            return None;
        }
    };

    match forwarder.forward(&query).await {
        Ok(response) => Some(response),
        Err(ForwardError::LimitExceeded) => Some(Message::reply_with_rcode(&query, Rcode::REFUSED)),
        Err(_) => Some(Message::reply_with_rcode(&query, Rcode::SERVFAIL)),
    }
}
