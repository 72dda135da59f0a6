//! Logs and metrics.
//!
//! # Data Flow
//! ```text
//! Forwarder::forward, HealthMonitor probes, DnsServer replies
//!     → tracing events, filtered by RUST_LOG or `observability.log_level`
//!     → metrics.rs record_* helpers (dns_forward_* series)
//!
//! Output:
//!     → stdout, pretty for terminals or one JSON object per line
//!     → Prometheus scrape on `observability.metrics_address` when `metrics_enabled`
//! ```
//!
//! Without an installed recorder the record_* helpers are no-ops.

pub mod logging;
pub mod metrics;
