//! Shared utilities for integration tests: mock upstream resolvers and clients.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dns_forward::config::{parse_config, ForwardConfig};
use dns_forward::dns::{Message, Rcode, MAX_UDP_SIZE};
use dns_forward::upstream::transport::{read_frame, write_frame};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// How a mock upstream treats incoming queries.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    /// Answer with this rcode.
    Rcode(Rcode),
    /// Never answer.
    Silent,
    /// Answer NOERROR with TC set over UDP, and in full over TCP.
    Truncated,
}

/// Handle to a running mock upstream.
#[derive(Clone)]
pub struct MockUpstream {
    pub addr: SocketAddr,
    reply: Arc<Mutex<Reply>>,
    udp_queries: Arc<AtomicUsize>,
    tcp_queries: Arc<AtomicUsize>,
    tcp_connections: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub fn set(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn udp_queries(&self) -> usize {
        self.udp_queries.load(Ordering::SeqCst)
    }

    pub fn tcp_queries(&self) -> usize {
        self.tcp_queries.load(Ordering::SeqCst)
    }

    pub fn tcp_connections(&self) -> usize {
        self.tcp_connections.load(Ordering::SeqCst)
    }

    fn current(&self) -> Reply {
        *self.reply.lock().unwrap()
    }
}

/// Start a UDP + TCP mock resolver on `addr`.
pub async fn start_mock_upstream(addr: SocketAddr, reply: Reply) -> MockUpstream {
    let udp = UdpSocket::bind(addr).await.unwrap();
    let tcp = TcpListener::bind(addr).await.unwrap();

    let mock = MockUpstream {
        addr,
        reply: Arc::new(Mutex::new(reply)),
        udp_queries: Arc::new(AtomicUsize::new(0)),
        tcp_queries: Arc::new(AtomicUsize::new(0)),
        tcp_connections: Arc::new(AtomicUsize::new(0)),
    };

    let udp_mock = mock.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_UDP_SIZE];
        loop {
            let Ok((len, peer)) = udp.recv_from(&mut buf).await else {
                break;
            };
            let Ok(query) = Message::from_bytes(buf[..len].to_vec()) else {
                continue;
            };
            udp_mock.udp_queries.fetch_add(1, Ordering::SeqCst);

            let reply = match udp_mock.current() {
                Reply::Rcode(rcode) => Message::reply_with_rcode(&query, rcode),
                Reply::Silent => continue,
                Reply::Truncated => {
                    let mut bytes = Message::reply_with_rcode(&query, Rcode::NOERROR).into_bytes();
                    bytes[2] |= 0x02;
                    Message::from_bytes(bytes).unwrap()
                }
            };
            let _ = udp.send_to(reply.as_bytes(), peer).await;
        }
    });

    let tcp_mock = mock.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = tcp.accept().await else {
                break;
            };
            tcp_mock.tcp_connections.fetch_add(1, Ordering::SeqCst);
            let mock = tcp_mock.clone();
            tokio::spawn(serve_tcp(stream, mock));
        }
    });

    mock
}

async fn serve_tcp(mut stream: TcpStream, mock: MockUpstream) {
    while let Ok(query) = read_frame(&mut stream).await {
        mock.tcp_queries.fetch_add(1, Ordering::SeqCst);
        let reply = match mock.current() {
            Reply::Rcode(rcode) => Message::reply_with_rcode(&query, rcode),
            Reply::Silent => continue,
            Reply::Truncated => Message::reply_with_rcode(&query, Rcode::NOERROR),
        };
        if write_frame(&mut stream, &reply).await.is_err() {
            break;
        }
    }
}

/// Build a validated config from TOML with `upstreams` filled in.
pub fn config(upstreams: &[String], extra: &str) -> ForwardConfig {
    let list = upstreams
        .iter()
        .map(|u| format!("\"{u}\""))
        .collect::<Vec<_>>()
        .join(", ");
    parse_config(&format!("upstreams = [{list}]\n{extra}")).unwrap()
}

pub fn query(id: u16) -> Message {
    Message::health_probe(id, true)
}

/// Send one query over UDP and wait for the reply.
pub async fn udp_query(server: SocketAddr, query: &Message) -> Message {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(query.as_bytes(), server).await.unwrap();
    let mut buf = vec![0u8; MAX_UDP_SIZE];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("no UDP reply")
        .unwrap();
    Message::from_bytes(buf[..len].to_vec()).unwrap()
}

/// Send one query over TCP and wait for the reply.
pub async fn tcp_query(server: SocketAddr, query: &Message) -> Message {
    let mut stream = TcpStream::connect(server).await.unwrap();
    write_frame(&mut stream, query).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), read_frame(&mut stream))
        .await
        .expect("no TCP reply")
        .unwrap()
}
