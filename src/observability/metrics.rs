//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define forwarder metrics (requests, responses, failures, latency)
//! - Expose a Prometheus-compatible metrics endpoint
//! - Track per-upstream and aggregate metrics
//!
//! # Metrics
//! - `dns_forward_requests_total` (counter): attempts sent, by upstream
//! - `dns_forward_responses_total` (counter): responses, by upstream and rcode
//! - `dns_forward_attempt_failures_total` (counter): by upstream and reason
//! - `dns_forward_request_duration_seconds` (histogram): attempt latency
//! - `dns_forward_upstream_healthy` (gauge): 1=healthy, 0=unhealthy
//! - `dns_forward_healthcheck_failures_total` (counter): failed probes
//! - `dns_forward_all_unhealthy_total` (counter): queries that found no healthy upstream
//! - `dns_forward_limit_rejections_total` (counter): queries refused by the concurrency limit
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels are the upstream display form (`udp://1.1.1.1:53`)

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::dns::Rcode;
use crate::upstream::UpstreamAddr;

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(to: UpstreamAddr) {
    ::metrics::counter!("dns_forward_requests_total", "to" => to.to_string()).increment(1);
}

/// Record an upstream response and the latency of the attempt that produced it.
pub fn record_response(to: UpstreamAddr, rcode: Rcode, elapsed: Duration) {
    let to = to.to_string();
    ::metrics::counter!("dns_forward_responses_total", "to" => to.clone(), "rcode" => rcode.to_string())
        .increment(1);
    ::metrics::histogram!("dns_forward_request_duration_seconds", "to" => to).record(elapsed.as_secs_f64());
}

pub fn record_attempt_failure(to: UpstreamAddr, reason: &'static str) {
    ::metrics::counter!(
        "dns_forward_attempt_failures_total",
        "to" => to.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_upstream_health(to: UpstreamAddr, healthy: bool) {
    let value = if healthy { 1.0 } else { 0.0 };
    ::metrics::gauge!("dns_forward_upstream_healthy", "to" => to.to_string()).set(value);
}

pub fn record_healthcheck_failure(to: UpstreamAddr) {
    ::metrics::counter!("dns_forward_healthcheck_failures_total", "to" => to.to_string()).increment(1);
}

pub fn record_all_unhealthy() {
    ::metrics::counter!("dns_forward_all_unhealthy_total").increment(1);
}

pub fn record_limit_rejection() {
    ::metrics::counter!("dns_forward_limit_rejections_total").increment(1);
}
