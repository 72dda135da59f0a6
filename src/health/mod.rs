//! Upstream health.
//!
//! # Data Flow
//! ```text
//! Forwarder attempt fails → Proxy::mark_failure (passive, per query)
//!     → max_fails reached → proxy marked unhealthy
//!
//! monitor.rs ticks every interval
//!     → probes unhealthy proxies with `. IN NS`
//!     → any reply → Proxy::mark_success → healthy again
//! ```
//!
//! # Design Decisions
//! - Healthy proxies are never probed; live traffic is their health check
//! - One monitor per pool generation, restarted on reload

pub mod monitor;

pub use monitor::{HealthMonitor, MonitorHandle};
