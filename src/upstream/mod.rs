//! Upstream endpoints.
//!
//! # Data Flow
//! ```text
//! "tcp://9.9.9.9:53"
//!     → address.rs (UpstreamAddr: socket address + protocol)
//!     → proxy.rs (health flag, failure counter, statistics)
//!     → transport.rs (checked-out UDP/TCP connection per exchange)
//! ```
//!
//! # Design Decisions
//! - Health state is per proxy and updated with atomics only
//! - Transports are traits so the forwarder can be driven without sockets

pub mod address;
pub mod proxy;
pub mod transport;

pub use address::{AddressError, Protocol, UpstreamAddr};
pub use proxy::{HealthState, Proxy, ProxySnapshot};
pub use transport::{AttemptError, DnsTransport, Transport, TransportOptions};
