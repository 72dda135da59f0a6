//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the forwarder.
//! All types derive Serde traits for deserialization from TOML files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dns::Rcode;
use crate::load_balancer::PolicyKind;
use crate::upstream::{AddressError, TransportOptions, UpstreamAddr};

/// Root configuration for the forwarder.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ForwardConfig {
    /// Upstream resolvers, e.g. `["1.1.1.1", "tcp://9.9.9.9:53"]`.
    pub upstreams: Vec<String>,

    /// Selection policy.
    pub policy: PolicyKind,

    /// Maximum queries in flight at once (0 = unlimited).
    pub max_concurrent: usize,

    /// Response codes that make the forwarder try the next upstream.
    pub failover_rcodes: Vec<Rcode>,

    /// Listener configuration (bind address, TCP).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upstream transport settings.
    pub transport: TransportConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Telemetry sinks.
    pub tap: TapConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ForwardConfig {
    /// Parse every configured upstream address.
    pub fn upstream_addrs(&self) -> Result<Vec<UpstreamAddr>, AddressError> {
        self.upstreams.iter().map(|u| u.parse()).collect()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address for UDP (and TCP when enabled).
    pub bind_address: String,

    /// Also accept queries over TCP.
    pub tcp: bool,

    /// Maximum concurrent TCP connections (backpressure).
    pub max_tcp_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5353".to_string(),
            tcp: true,
            max_tcp_connections: 1_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a single upstream attempt in milliseconds.
    pub attempt_ms: u64,
}

impl TimeoutConfig {
    pub fn attempt(&self) -> Duration {
        Duration::from_millis(self.attempt_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { attempt_ms: 2_000 }
    }
}

/// Upstream transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Use TCP to every upstream regardless of its scheme.
    pub force_tcp: bool,

    /// Idle connections older than this are not reused (seconds).
    pub expire_secs: u64,

    /// Idle connections cached per upstream and protocol.
    pub max_idle_per_upstream: usize,
}

impl TransportConfig {
    pub fn options(&self) -> TransportOptions {
        TransportOptions {
            force_tcp: self.force_tcp,
            expire: Duration::from_secs(self.expire_secs),
            max_idle: self.max_idle_per_upstream,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            force_tcp: false,
            expire_secs: 10,
            max_idle_per_upstream: 16,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Run the background health monitor.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Consecutive failed attempts before an upstream is marked down (0 = never).
    pub max_fails: u32,

    /// Set the RD bit on probe queries.
    pub recursion_desired: bool,

    /// Fail queries outright when every upstream is down instead of trying them anyway.
    pub failfast_all_unhealthy: bool,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 500,
            timeout_ms: 1_000,
            max_fails: 2,
            recursion_desired: true,
            failfast_all_unhealthy: false,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TapConfig {
    /// Accept tap sinks. When false, registrations are ignored.
    pub enabled: bool,

    /// Sinks in chain order.
    pub sinks: Vec<TapSinkConfig>,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sinks: Vec::new(),
        }
    }
}

/// A declared telemetry sink.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TapSinkConfig {
    /// Emit a structured log event per forwarded query.
    Log {
        #[serde(default = "default_tap_label")]
        label: String,
    },
}

fn default_tap_label() -> String {
    "tap".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9153".to_string(),
        }
    }
}
