//! Upstream transport: one query/response exchange per call.
//!
//! # Responsibilities
//! - Send a query to one upstream over UDP or TCP and read the matching reply
//! - Reuse connections through a small per-upstream idle cache
//! - Retry truncated UDP replies over TCP on the same upstream
//!
//! # Design Decisions
//! - A connection is checked out for the duration of one exchange and
//!   only returned to the cache after a clean reply. Errors and cancelled
//!   attempts drop the connection.
//! - Idle connections older than `expire` are discarded on checkout
//! - A reused TCP stream that turns out to be closed is redialled once

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::dns::{Message, MessageError, MAX_UDP_SIZE};
use crate::upstream::address::{Protocol, UpstreamAddr};

/// Why a single attempt against one upstream failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed response: {0}")]
    Malformed(#[from] MessageError),

    #[error("reply is not a response (QR unset)")]
    NotResponse,

    #[error("reply id {got} does not match query id {expected}")]
    IdMismatch { expected: u16, got: u16 },

    #[error("response of {0} bytes exceeds limit")]
    TooLarge(usize),
}

impl AttemptError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AttemptError::Timeout(_) => "timeout",
            AttemptError::Io(_) => "io",
            AttemptError::Malformed(_)
            | AttemptError::NotResponse
            | AttemptError::IdMismatch { .. }
            | AttemptError::TooLarge(_) => "malformed",
        }
    }
}

/// A query/response exchange with one upstream.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn exchange(&self, query: &Message) -> Result<Message, AttemptError>;

    /// Drop any cached connections.
    fn close(&self) {}
}

/// Transport tuning shared by every proxy in a pool.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Use TCP regardless of the upstream's scheme.
    pub force_tcp: bool,
    /// Idle connections older than this are not reused.
    pub expire: Duration,
    /// Maximum idle connections kept per protocol.
    pub max_idle: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            force_tcp: false,
            expire: Duration::from_secs(10),
            max_idle: 16,
        }
    }
}

struct Idle<T> {
    conn: T,
    since: Instant,
}

/// UDP/TCP transport with per-upstream connection reuse.
pub struct DnsTransport {
    addr: UpstreamAddr,
    options: TransportOptions,
    idle_udp: Mutex<Vec<Idle<UdpSocket>>>,
    idle_tcp: Mutex<Vec<Idle<TcpStream>>>,
}

impl fmt::Debug for DnsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsTransport")
            .field("addr", &self.addr)
            .field("options", &self.options)
            .finish()
    }
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DnsTransport {
    /// Create a transport for the given upstream.
    pub fn new(addr: UpstreamAddr, options: TransportOptions) -> Self {
        Self {
            addr,
            options,
            idle_udp: Mutex::new(Vec::new()),
            idle_tcp: Mutex::new(Vec::new()),
        }
    }

    /// Protocol actually used for exchanges.
    pub fn protocol(&self) -> Protocol {
        if self.options.force_tcp {
            Protocol::Tcp
        } else {
            self.addr.protocol
        }
    }

    /// Number of idle connections currently cached (UDP, TCP).
    pub fn idle_counts(&self) -> (usize, usize) {
        (lock(&self.idle_udp).len(), lock(&self.idle_tcp).len())
    }

    fn checkout<T>(&self, slot: &Mutex<Vec<Idle<T>>>) -> Option<T> {
        let mut idle = lock(slot);
        while let Some(entry) = idle.pop() {
            if entry.since.elapsed() < self.options.expire {
                return Some(entry.conn);
            }
        }
        None
    }

    fn checkin<T>(&self, slot: &Mutex<Vec<Idle<T>>>, conn: T) {
        let mut idle = lock(slot);
        if idle.len() < self.options.max_idle {
            idle.push(Idle {
                conn,
                since: Instant::now(),
            });
        }
    }

    async fn dial_udp(&self) -> io::Result<UdpSocket> {
        let target = self.addr.socket_addr;
        let local: SocketAddr = if target.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        Ok(socket)
    }

    async fn exchange_udp(&self, query: &Message) -> Result<Message, AttemptError> {
        let socket = match self.checkout(&self.idle_udp) {
            Some(socket) => socket,
            None => self.dial_udp().await?,
        };

        socket.send(query.as_bytes()).await?;

        let mut buf = vec![0u8; MAX_UDP_SIZE];
        loop {
            let len = socket.recv(&mut buf).await?;
            let reply = Message::from_bytes(buf[..len].to_vec())?;

            // Late answer to an earlier query on a reused socket
            if reply.id() != query.id() {
                tracing::debug!(upstream = %self.addr, id = reply.id(), "Discarding stale UDP reply");
                continue;
            }
            if !reply.is_response() {
                return Err(AttemptError::NotResponse);
            }

            self.checkin(&self.idle_udp, socket);
            return Ok(reply);
        }
    }

    async fn exchange_tcp(&self, query: &Message) -> Result<Message, AttemptError> {
        if let Some(stream) = self.checkout(&self.idle_tcp) {
            match self.exchange_on_stream(stream, query).await {
                Ok(reply) => return Ok(reply),
                Err(AttemptError::Io(e)) => {
                    tracing::debug!(upstream = %self.addr, error = %e, "Cached TCP connection failed, redialling");
                }
                Err(e) => return Err(e),
            }
        }

        let stream = TcpStream::connect(self.addr.socket_addr).await?;
        stream.set_nodelay(true)?;
        self.exchange_on_stream(stream, query).await
    }

    async fn exchange_on_stream(
        &self,
        mut stream: TcpStream,
        query: &Message,
    ) -> Result<Message, AttemptError> {
        if query.len() > u16::MAX as usize {
            return Err(AttemptError::TooLarge(query.len()));
        }
        write_frame(&mut stream, query).await?;

        let reply = read_frame(&mut stream).await?;
        if reply.id() != query.id() {
            return Err(AttemptError::IdMismatch {
                expected: query.id(),
                got: reply.id(),
            });
        }
        if !reply.is_response() {
            return Err(AttemptError::NotResponse);
        }

        self.checkin(&self.idle_tcp, stream);
        Ok(reply)
    }
}

/// Read one length-prefixed DNS message from a stream.
pub async fn read_frame<S>(stream: &mut S) -> Result<Message, AttemptError>
where
    S: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Message::from_bytes(body)?)
}

/// Write one length-prefixed DNS message to a stream.
pub async fn write_frame<S>(stream: &mut S, message: &Message) -> io::Result<()>
where
    S: AsyncWriteExt + Unpin,
{
    let payload = message.as_bytes();
    let len = u16::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message exceeds 65535 bytes"))?;
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await
}

#[async_trait]
impl Transport for DnsTransport {
    async fn exchange(&self, query: &Message) -> Result<Message, AttemptError> {
        match self.protocol() {
            Protocol::Tcp => self.exchange_tcp(query).await,
            Protocol::Udp => {
                let reply = self.exchange_udp(query).await?;
                if reply.is_truncated() {
                    tracing::debug!(upstream = %self.addr, "Truncated UDP reply, retrying over TCP");
                    return self.exchange_tcp(query).await;
                }
                Ok(reply)
            }
        }
    }

    fn close(&self) {
        lock(&self.idle_udp).clear();
        lock(&self.idle_tcp).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use crate::dns::Rcode;

    fn truncated(query: &Message) -> Message {
        let mut bytes = Message::reply_with_rcode(query, Rcode::NOERROR).into_bytes();
        bytes[2] |= 0x02;
        Message::from_bytes(bytes).unwrap()
    }

    /// Answers each accepted connection `per_conn` times, then closes it.
    async fn tcp_server(per_conn: usize) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    for _ in 0..per_conn {
                        let Ok(query) = read_frame(&mut stream).await else {
                            return;
                        };
                        let reply = Message::reply_with_rcode(&query, Rcode::NOERROR);
                        if write_frame(&mut stream, &reply).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        (addr, accepted)
    }

    #[tokio::test]
    async fn test_udp_discards_stale_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_SIZE];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            let query = Message::from_bytes(buf[..len].to_vec()).unwrap();

            let mut stale = Message::reply_with_rcode(&query, Rcode::SERVFAIL);
            stale.set_id(query.id().wrapping_add(1));
            server.send_to(stale.as_bytes(), peer).await.unwrap();

            let reply = Message::reply_with_rcode(&query, Rcode::NOERROR);
            server.send_to(reply.as_bytes(), peer).await.unwrap();
        });

        let transport = DnsTransport::new(UpstreamAddr::udp(addr), TransportOptions::default());
        let reply = transport.exchange(&Message::health_probe(100, true)).await.unwrap();
        assert_eq!(reply.id(), 100);
        assert_eq!(reply.rcode(), Rcode::NOERROR);
        assert_eq!(transport.idle_counts(), (1, 0));
    }

    #[tokio::test]
    async fn test_tcp_reuse_and_redial() {
        let (addr, accepted) = tcp_server(1).await;
        let transport = DnsTransport::new(UpstreamAddr::tcp(addr), TransportOptions::default());

        transport.exchange(&Message::health_probe(1, true)).await.unwrap();
        assert_eq!(transport.idle_counts(), (0, 1));

        // the cached stream was closed by the server; the transport redials
        let reply = transport.exchange(&Message::health_probe(2, true)).await.unwrap();
        assert_eq!(reply.id(), 2);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tcp_stream_kept_alive() {
        let (addr, accepted) = tcp_server(usize::MAX).await;
        let transport = DnsTransport::new(UpstreamAddr::tcp(addr), TransportOptions::default());

        for id in 0..4 {
            transport.exchange(&Message::health_probe(id, true)).await.unwrap();
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);

        transport.close();
        assert_eq!(transport.idle_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_expired_idle_not_reused() {
        let (addr, accepted) = tcp_server(usize::MAX).await;
        let options = TransportOptions {
            expire: Duration::ZERO,
            ..Default::default()
        };
        let transport = DnsTransport::new(UpstreamAddr::tcp(addr), options);

        transport.exchange(&Message::health_probe(1, true)).await.unwrap();
        transport.exchange(&Message::health_probe(2, true)).await.unwrap();
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_truncated_udp_falls_back_to_tcp() {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = udp.local_addr().unwrap();
        let tcp = TcpListener::bind(addr).await.unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_SIZE];
            let (len, peer) = udp.recv_from(&mut buf).await.unwrap();
            let query = Message::from_bytes(buf[..len].to_vec()).unwrap();
            udp.send_to(truncated(&query).as_bytes(), peer).await.unwrap();
        });
        tokio::spawn(async move {
            let (mut stream, _) = tcp.accept().await.unwrap();
            let query = read_frame(&mut stream).await.unwrap();
            let reply = Message::reply_with_rcode(&query, Rcode::NOERROR);
            write_frame(&mut stream, &reply).await.unwrap();
        });

        let transport = DnsTransport::new(UpstreamAddr::udp(addr), TransportOptions::default());
        let reply = transport.exchange(&Message::health_probe(3, true)).await.unwrap();
        assert!(!reply.is_truncated());
        assert_eq!(reply.id(), 3);
    }

    #[test]
    fn test_force_tcp_overrides_scheme() {
        let addr = UpstreamAddr::udp("127.0.0.1:53".parse().unwrap());
        let options = TransportOptions {
            force_tcp: true,
            ..Default::default()
        };
        assert_eq!(DnsTransport::new(addr, options).protocol(), Protocol::Tcp);
        assert_eq!(DnsTransport::new(addr, TransportOptions::default()).protocol(), Protocol::Udp);
    }
}
