//! Upstream proxy abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream resolver
//! - Track consecutive failures and the derived health state
//! - Own the transport used for queries and health probes
//! - Keep per-upstream statistics for diagnostics

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::dns::Message;
use crate::resilience::timeouts::with_timeout;
use crate::upstream::address::UpstreamAddr;
use crate::upstream::transport::{AttemptError, DnsTransport, Transport, TransportOptions};

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy = 0,
    Unhealthy = 1,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            0 => HealthState::Healthy,
            _ => HealthState::Unhealthy,
        }
    }
}

/// Point-in-time view of a proxy, for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySnapshot {
    pub addr: UpstreamAddr,
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub attempts: u64,
    pub failed_attempts: u64,
    pub probes: u64,
    pub failed_probes: u64,
}

/// A single upstream resolver.
#[derive(Debug)]
pub struct Proxy {
    addr: UpstreamAddr,
    transport: Arc<dyn Transport>,

    /// Current health state (0=Healthy, 1=Unhealthy).
    state: AtomicU8,
    /// Consecutive failure count, reset on success.
    fails: AtomicU32,

    attempts: AtomicU64,
    failed_attempts: AtomicU64,
    probes: AtomicU64,
    failed_probes: AtomicU64,
}

impl Proxy {
    /// Create a proxy using the given transport. Starts out healthy.
    pub fn new(addr: UpstreamAddr, transport: Arc<dyn Transport>) -> Self {
        Self {
            addr,
            transport,
            state: AtomicU8::new(HealthState::Healthy as u8),
            fails: AtomicU32::new(0),
            attempts: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            probes: AtomicU64::new(0),
            failed_probes: AtomicU64::new(0),
        }
    }

    /// Create a proxy backed by a UDP/TCP [`DnsTransport`].
    pub fn dial(addr: UpstreamAddr, options: TransportOptions) -> Self {
        Self::new(addr, Arc::new(DnsTransport::new(addr, options)))
    }

    pub fn addr(&self) -> UpstreamAddr {
        self.addr
    }

    pub fn health_state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.health_state() == HealthState::Healthy
    }

    /// Current consecutive failure count.
    pub fn fails(&self) -> u32 {
        self.fails.load(Ordering::Acquire)
    }

    /// Send one query. Deadlines are the caller's concern.
    pub async fn exchange(&self, query: &Message) -> Result<Message, AttemptError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.transport.exchange(query).await
    }

    // --- Health Logic ---

    /// Report a successful attempt. Returns true if the proxy was unhealthy.
    pub fn mark_success(&self) -> bool {
        self.fails.store(0, Ordering::Release);
        let prev = self.state.swap(HealthState::Healthy as u8, Ordering::AcqRel);
        HealthState::from(prev) == HealthState::Unhealthy
    }

    /// Report a failed attempt. Returns true if this failure flipped the
    /// proxy to unhealthy. A `max_fails` of zero never marks it down.
    pub fn mark_failure(&self, max_fails: u32) -> bool {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        let fails = self.fails.fetch_add(1, Ordering::AcqRel).saturating_add(1);

        if max_fails == 0 || fails < max_fails {
            return false;
        }

        let prev = self.state.swap(HealthState::Unhealthy as u8, Ordering::AcqRel);
        HealthState::from(prev) == HealthState::Healthy
    }

    /// Send a `. IN NS` probe. Any well-formed reply restores the proxy.
    pub async fn probe(&self, timeout: Duration, recursion_desired: bool) -> Result<(), AttemptError> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let query = Message::health_probe(rand::random(), recursion_desired);

        match with_timeout(timeout, self.transport.exchange(&query)).await {
            Ok(_) => {
                self.mark_success();
                Ok(())
            }
            Err(e) => {
                self.failed_probes.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Release cached connections.
    pub fn close(&self) {
        self.transport.close();
    }

    pub fn snapshot(&self) -> ProxySnapshot {
        ProxySnapshot {
            addr: self.addr,
            state: self.health_state(),
            consecutive_failures: self.fails(),
            attempts: self.attempts.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
            failed_probes: self.failed_probes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::Rcode;
    use crate::upstream::testing::{Behavior, ScriptedTransport};

    fn proxy(behavior: Behavior) -> (Proxy, Arc<ScriptedTransport>) {
        let transport = ScriptedTransport::new(behavior);
        let p = Proxy::new("127.0.0.1:53".parse().unwrap(), transport.clone());
        (p, transport)
    }

    #[test]
    fn test_marked_down_at_threshold() {
        let (p, _) = proxy(Behavior::Answer(Rcode::NOERROR));
        assert!(p.is_healthy());

        assert!(!p.mark_failure(2));
        assert!(p.is_healthy());
        assert_eq!(p.fails(), 1);

        assert!(p.mark_failure(2));
        assert!(!p.is_healthy());

        // Further failures do not report a new transition
        assert!(!p.mark_failure(2));
        assert_eq!(p.fails(), 3);
    }

    #[test]
    fn test_success_resets_failures() {
        let (p, _) = proxy(Behavior::Answer(Rcode::NOERROR));
        p.mark_failure(1);
        assert!(!p.is_healthy());

        assert!(p.mark_success());
        assert!(p.is_healthy());
        assert_eq!(p.fails(), 0);
        assert!(!p.mark_success());
    }

    #[test]
    fn test_zero_threshold_never_marks_down() {
        let (p, _) = proxy(Behavior::Answer(Rcode::NOERROR));
        for _ in 0..10 {
            assert!(!p.mark_failure(0));
        }
        assert!(p.is_healthy());
        assert_eq!(p.snapshot().failed_attempts, 10);
    }

    #[tokio::test]
    async fn test_probe_restores_health() {
        let (p, transport) = proxy(Behavior::Refuse);
        p.mark_failure(1);

        assert!(p.probe(Duration::from_millis(100), true).await.is_err());
        assert!(!p.is_healthy());

        transport.set(Behavior::Answer(Rcode::SERVFAIL));
        p.probe(Duration::from_millis(100), true).await.unwrap();
        assert!(p.is_healthy());
        assert_eq!(p.fails(), 0);

        let snap = p.snapshot();
        assert_eq!(snap.probes, 2);
        assert_eq!(snap.failed_probes, 1);
        // probes are not query attempts
        assert_eq!(snap.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_times_out() {
        let (p, _) = proxy(Behavior::Hang);
        let err = p.probe(Duration::from_millis(200), false).await.unwrap_err();
        assert!(matches!(err, AttemptError::Timeout(_)));
    }
}
