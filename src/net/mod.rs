//! Client-facing DNS listener.
//!
//! ```text
//! UDP datagram or TCP length-prefixed frame
//!     → listener.rs
//!     → Forwarder::forward, one task per query
//!     → upstream answer, or SERVFAIL / REFUSED built from the query
//! ```
//!
//! TCP connections are capped by `listener.max_tcp_connections`; UDP and
//! TCP share one port.

pub mod listener;

pub use listener::{DnsServer, ListenerError};
