//! Query forwarding across the current pool generation.
//!
//! # Responsibilities
//! - Order candidates through the pool's policy and try them in turn
//! - Account every attempt against the proxy that served it
//! - Offer each completed forward to the telemetry chain
//! - Swap pool generations atomically on reload
//! - Own the health monitor for the current generation

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwap;

use crate::config::{ForwardConfig, HealthCheckConfig};
use crate::dns::Message;
use crate::forward::error::ForwardError;
use crate::forward::pool::{PoolError, ProxyPool};
use crate::health::{HealthMonitor, MonitorHandle};
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;
use crate::tap::{TapChain, TapEvent, TapOutcome, TapSink};
use crate::upstream::{Proxy, ProxySnapshot, UpstreamAddr};

/// Answer plus the upstream that produced it.
type Answered = (UpstreamAddr, Message);

/// Tap registration state, swapped as one value.
#[derive(Debug, Clone)]
struct TapState {
    enabled: bool,
    chain: Arc<TapChain>,
}

impl TapState {
    fn empty(enabled: bool) -> Self {
        Self {
            enabled,
            chain: Arc::new(TapChain::new()),
        }
    }
}

/// Relays queries to the upstreams of the installed pool.
///
/// Shared as `Arc<Forwarder>` by every listener task. Reads of the pool and
/// the tap chain never take a lock.
#[derive(Debug)]
pub struct Forwarder {
    pool: ArcSwap<ProxyPool>,
    taps: ArcSwap<TapState>,
    health_check: ArcSwap<HealthCheckConfig>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl Forwarder {
    pub fn new(pool: ProxyPool, health_check: HealthCheckConfig) -> Self {
        Self {
            pool: ArcSwap::from_pointee(pool),
            taps: ArcSwap::from_pointee(TapState::empty(true)),
            health_check: ArcSwap::from_pointee(health_check),
            monitor: Mutex::new(None),
        }
    }

    /// Build the first generation from configuration. Taps start empty.
    pub fn from_config(config: &ForwardConfig) -> Result<Self, PoolError> {
        let forwarder = Self::new(ProxyPool::from_config(config)?, config.health_check.clone());
        forwarder.reset_taps(config.tap.enabled);
        Ok(forwarder)
    }

    /// The generation new queries will use.
    pub fn pool(&self) -> Arc<ProxyPool> {
        self.pool.load_full()
    }

    /// Candidate order exactly as the next query would see it.
    ///
    /// Advances round-robin state like a real query.
    pub fn list(&self) -> Vec<Arc<Proxy>> {
        self.pool.load().list()
    }

    pub fn snapshots(&self) -> Vec<ProxySnapshot> {
        self.pool.load().proxies().iter().map(|p| p.snapshot()).collect()
    }

    /// Forward `query` to the first candidate that answers.
    pub async fn forward(&self, query: &Message) -> Result<Message, ForwardError> {
        let pool = self.pool.load_full();
        let _permit = pool.try_acquire()?;

        let started = Instant::now();
        let (result, attempts) = self.try_candidates(&pool, query).await;

        let taps = &self.taps.load().chain;
        if !taps.is_empty() {
            let outcome = match &result {
                Ok((upstream, response)) => TapOutcome::Answered {
                    upstream: *upstream,
                    response,
                },
                Err(error) => TapOutcome::Failed { error },
            };
            taps.offer(&TapEvent {
                query,
                outcome,
                attempts,
                elapsed: started.elapsed(),
                timestamp: SystemTime::now(),
            });
        }

        result.map(|(_, response)| response)
    }

    /// [`forward`](Self::forward) bounded by a deadline for the whole call.
    pub async fn forward_within(&self, query: &Message, budget: Duration) -> Result<Message, ForwardError> {
        match tokio::time::timeout(budget, self.forward(query)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(id = query.id(), budget_ms = budget.as_millis() as u64, "Forward deadline exceeded");
                Err(ForwardError::DeadlineExceeded)
            }
        }
    }

    async fn try_candidates(&self, pool: &ProxyPool, query: &Message) -> (Result<Answered, ForwardError>, usize) {
        let settings = pool.settings();
        let candidates = pool.list();

        let ignore_health = !candidates.iter().any(|p| p.is_healthy());
        if ignore_health {
            metrics::record_all_unhealthy();
            if settings.failfast_all_unhealthy {
                tracing::warn!(id = query.id(), "All upstreams unhealthy, refusing query");
                return (Err(ForwardError::NoHealthyUpstream), 0);
            }
            tracing::warn!(id = query.id(), "All upstreams unhealthy, trying them anyway");
        }

        let mut attempts = 0;
        let mut last_error = None;
        let mut failover: Option<Answered> = None;

        for proxy in candidates {
            if !ignore_health && !proxy.is_healthy() {
                continue;
            }

            attempts += 1;
            let addr = proxy.addr();
            metrics::record_request(addr);
            let attempt_started = Instant::now();

            match with_timeout(settings.attempt_timeout, proxy.exchange(query)).await {
                Ok(response) => {
                    let rcode = response.rcode();
                    metrics::record_response(addr, rcode, attempt_started.elapsed());

                    if settings.is_failover(rcode) {
                        tracing::debug!(upstream = %addr, rcode = %rcode, "Failover rcode, trying next upstream");
                        failover = Some((addr, response));
                        continue;
                    }

                    if proxy.mark_success() {
                        tracing::info!(upstream = %addr, "Upstream answered, marked healthy");
                        metrics::record_upstream_health(addr, true);
                    }
                    return (Ok((addr, response)), attempts);
                }
                Err(e) => {
                    metrics::record_attempt_failure(addr, e.reason());
                    tracing::warn!(upstream = %addr, id = query.id(), error = %e, "Upstream attempt failed");

                    if proxy.mark_failure(settings.max_fails) {
                        tracing::warn!(
                            upstream = %addr,
                            fails = proxy.fails(),
                            "Upstream marked unhealthy"
                        );
                        metrics::record_upstream_health(addr, false);
                    }
                    last_error = Some(e.to_string());
                }
            }
        }

        if let Some(answer) = failover {
            return (Ok(answer), attempts);
        }

        let error = ForwardError::Exhausted {
            attempts,
            last_error: last_error.unwrap_or_else(|| "no candidate upstream".to_string()),
        };
        tracing::warn!(id = query.id(), error = %error, "Forward failed");
        (Err(error), attempts)
    }

    // --- Telemetry ---

    /// Append `sink` to the tap chain. Ignored while taps are disabled.
    ///
    /// Returns whether the sink was registered.
    pub fn set_tap_plugin(&self, sink: Arc<dyn TapSink>) -> bool {
        let mut registered = false;
        self.taps.rcu(|state| {
            registered = state.enabled;
            if !state.enabled {
                return Arc::clone(state);
            }
            Arc::new(TapState {
                enabled: true,
                chain: Arc::new(state.chain.with(sink.clone())),
            })
        });
        if !registered {
            tracing::debug!(sink = sink.name(), "Taps disabled, ignoring sink");
        }
        registered
    }

    /// Start a fresh setup pass: drop every registered sink.
    ///
    /// The flag and the empty chain are published together.
    pub fn reset_taps(&self, enabled: bool) {
        self.taps.store(Arc::new(TapState::empty(enabled)));
    }

    pub fn taps_enabled(&self) -> bool {
        self.taps.load().enabled
    }

    pub fn tap_count(&self) -> usize {
        self.taps.load().chain.len()
    }

    pub fn taps(&self) -> Arc<TapChain> {
        Arc::clone(&self.taps.load().chain)
    }

    // --- Health monitor ---

    /// Start probing the current generation. No-op if disabled or already running.
    pub fn start_health_monitor(&self) -> bool {
        let health_check = self.health_check.load_full();
        if !health_check.enabled {
            return false;
        }

        let mut monitor = self.monitor_slot();
        if monitor.is_some() {
            return false;
        }
        *monitor = Some(HealthMonitor::new(self.pool(), (*health_check).clone()).spawn());
        true
    }

    /// Stop the monitor, if any. Await the handle to wait for it to exit.
    pub fn stop_health_monitor(&self) -> Option<tokio::task::JoinHandle<()>> {
        self.monitor_slot().take().map(MonitorHandle::stop)
    }

    pub fn health_monitor_running(&self) -> bool {
        self.monitor_slot().is_some()
    }

    fn monitor_slot(&self) -> MutexGuard<'_, Option<MonitorHandle>> {
        self.monitor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Reconfiguration ---

    /// Install a new generation built from `config`.
    ///
    /// On error the running generation stays. In-flight queries finish on the
    /// generation they started with. The monitor is stopped and, when the new
    /// `health_check` enables it, started again against the new pool.
    pub fn reload(&self, config: &ForwardConfig) -> Result<(), PoolError> {
        let pool = ProxyPool::from_config(config)?;
        let upstreams = pool.len();
        let policy = pool.policy().name();

        self.stop_health_monitor();
        self.health_check.store(Arc::new(config.health_check.clone()));
        self.pool.store(Arc::new(pool));
        let monitoring = self.start_health_monitor();

        tracing::info!(upstreams, policy, monitoring, "Upstream pool reloaded");
        Ok(())
    }

    /// Stop the monitor and release idle upstream connections.
    pub fn close(&self) {
        self.stop_health_monitor();
        self.pool.load().close();
    }
}
