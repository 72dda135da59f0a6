//! TOML configuration.
//!
//! # Data Flow
//! ```text
//! dns-forward.toml
//!     → loader.rs: toml → ForwardConfig
//!     → validation.rs: upstream addresses, timeouts, tap sinks
//!     → Forwarder::from_config
//!
//! Edited file or SIGHUP:
//!     watcher.rs / main.rs re-read the file
//!     → same load + validate path
//!     → Forwarder::reload swaps in a fresh ProxyPool
//! ```
//!
//! A config that fails validation never replaces the running one. Every
//! section is optional except `upstreams`.

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ForwardConfig, HealthCheckConfig, ListenerConfig, LogFormat, ObservabilityConfig, TapConfig,
    TapSinkConfig, TimeoutConfig, TransportConfig,
};
pub use validation::ValidationError;
