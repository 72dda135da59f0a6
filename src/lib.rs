//! DNS forwarding proxy library.
//!
//! Relays queries to a pool of upstream resolvers chosen per query by a
//! selection policy, routes around failing upstreams and mirrors completed
//! forwards to telemetry sinks.

// Core subsystems
pub mod config;
pub mod dns;
pub mod forward;
pub mod net;
pub mod tap;
pub mod upstream;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ForwardConfig;
pub use forward::{ForwardError, Forwarder};
pub use lifecycle::Shutdown;
pub use net::DnsServer;
