//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe upstreams currently marked down
//! - Restore an upstream as soon as one probe gets a reply

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::forward::ProxyPool;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

pub struct HealthMonitor {
    pool: Arc<ProxyPool>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(pool: Arc<ProxyPool>, config: HealthCheckConfig) -> Self {
        Self { pool, config }
    }

    /// Run in the background until the returned handle is stopped.
    pub fn spawn(self) -> MonitorHandle {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        let task = tokio::spawn(self.run(rx));
        MonitorHandle { shutdown, task }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        let interval = self.config.interval();
        tracing::info!(
            interval_ms = self.config.interval_ms,
            upstreams = self.pool.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_unhealthy().await;
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every unhealthy upstream concurrently. Returns how many were restored.
    pub async fn probe_unhealthy(&self) -> usize {
        let down: Vec<_> = self
            .pool
            .proxies()
            .iter()
            .filter(|p| !p.is_healthy())
            .collect();
        if down.is_empty() {
            return 0;
        }

        let timeout = self.config.timeout();
        let rd = self.config.recursion_desired;
        let results = join_all(down.iter().map(|proxy| async move {
            (proxy.addr(), proxy.probe(timeout, rd).await)
        }))
        .await;

        let mut restored = 0;
        for (addr, result) in results {
            match result {
                Ok(()) => {
                    restored += 1;
                    tracing::info!(upstream = %addr, "Upstream restored by health probe");
                    metrics::record_upstream_health(addr, true);
                }
                Err(e) => {
                    tracing::debug!(upstream = %addr, error = %e, "Health probe failed");
                    metrics::record_healthcheck_failure(addr);
                }
            }
        }
        restored
    }
}

/// A running monitor task.
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Ask the task to exit. Await the returned handle to wait for it.
    pub fn stop(self) -> JoinHandle<()> {
        self.shutdown.trigger();
        self.task
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
