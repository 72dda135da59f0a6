//! Query forwarding.
//!
//! # Data Flow
//! ```text
//! Listener receives a query
//!     → forwarder.rs loads the current ProxyPool generation
//!     → pool.rs: concurrency permit, policy-ordered candidates
//!     → each candidate tried with its own attempt timeout
//!     → outcome recorded against the proxy's health
//!     → tap chain sees the completed forward
//!     → response or ForwardError back to the listener
//! ```
//!
//! # Design Decisions
//! - A pool generation is immutable; reload installs a new one
//! - Attempts within one query are sequential, never hedged
//! - The pool is not retried as a whole once every candidate failed

pub mod error;
pub mod forwarder;
pub mod pool;

pub use error::ForwardError;
pub use forwarder::Forwarder;
pub use pool::{ForwardSettings, PoolError, ProxyPool};
