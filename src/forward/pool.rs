//! One immutable generation of upstream proxies.
//!
//! # Responsibilities
//! - Own the proxies declared by one configuration
//! - Order them per query through the selected policy
//! - Carry the per-generation forwarding settings
//! - Bound concurrent forwards when a limit is configured

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ForwardConfig;
use crate::dns::Rcode;
use crate::forward::error::ForwardError;
use crate::load_balancer::{create_policy, Policy};
use crate::observability::metrics;
use crate::upstream::{AddressError, Proxy};

/// Error building a pool generation.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no upstreams configured")]
    Empty,

    #[error("invalid upstream: {0}")]
    Address(#[from] AddressError),
}

/// Forwarding behaviour shared by every query on one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSettings {
    /// Deadline for one upstream attempt.
    pub attempt_timeout: Duration,
    /// Consecutive failures before a proxy is marked down (0 = never).
    pub max_fails: u32,
    /// Refuse queries when every proxy is down instead of trying them anyway.
    pub failfast_all_unhealthy: bool,
    /// Response codes that move on to the next candidate.
    pub failover_rcodes: Vec<Rcode>,
}

impl ForwardSettings {
    pub fn from_config(config: &ForwardConfig) -> Self {
        Self {
            attempt_timeout: config.timeouts.attempt(),
            max_fails: config.health_check.max_fails,
            failfast_all_unhealthy: config.health_check.failfast_all_unhealthy,
            failover_rcodes: config.failover_rcodes.clone(),
        }
    }

    pub fn is_failover(&self, rcode: Rcode) -> bool {
        self.failover_rcodes.contains(&rcode)
    }
}

impl Default for ForwardSettings {
    fn default() -> Self {
        Self::from_config(&ForwardConfig::default())
    }
}

/// Proxies, policy and settings installed together.
#[derive(Debug)]
pub struct ProxyPool {
    proxies: Vec<Arc<Proxy>>,
    policy: Arc<dyn Policy>,
    settings: ForwardSettings,
    limiter: Option<Arc<Semaphore>>,
}

impl ProxyPool {
    /// Assemble a generation. `max_concurrent` of zero means unlimited.
    pub fn new(
        proxies: Vec<Arc<Proxy>>,
        policy: Arc<dyn Policy>,
        settings: ForwardSettings,
        max_concurrent: usize,
    ) -> Result<Self, PoolError> {
        if proxies.is_empty() {
            return Err(PoolError::Empty);
        }

        let limiter = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));

        Ok(Self {
            proxies,
            policy,
            settings,
            limiter,
        })
    }

    /// Dial every configured upstream and build the configured policy.
    pub fn from_config(config: &ForwardConfig) -> Result<Self, PoolError> {
        let options = config.transport.options();
        let proxies = config
            .upstream_addrs()?
            .into_iter()
            .map(|addr| Arc::new(Proxy::dial(addr, options)))
            .collect();

        Self::new(
            proxies,
            create_policy(config.policy),
            ForwardSettings::from_config(config),
            config.max_concurrent,
        )
    }

    /// Candidate order for the next query.
    pub fn list(&self) -> Vec<Arc<Proxy>> {
        self.policy.list(&self.proxies)
    }

    /// Proxies in configured order.
    pub fn proxies(&self) -> &[Arc<Proxy>] {
        &self.proxies
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn policy(&self) -> &dyn Policy {
        self.policy.as_ref()
    }

    pub fn settings(&self) -> &ForwardSettings {
        &self.settings
    }

    pub fn healthy_count(&self) -> usize {
        self.proxies.iter().filter(|p| p.is_healthy()).count()
    }

    /// Take a concurrency permit without waiting.
    ///
    /// Returns `Ok(None)` when no limit is configured.
    pub fn try_acquire(&self) -> Result<Option<OwnedSemaphorePermit>, ForwardError> {
        let Some(limiter) = &self.limiter else {
            return Ok(None);
        };

        match limiter.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => {
                metrics::record_limit_rejection();
                tracing::debug!("Concurrent query limit reached");
                Err(ForwardError::LimitExceeded)
            }
        }
    }

    /// Drop idle connections held by every proxy.
    pub fn close(&self) {
        for proxy in &self.proxies {
            proxy.close();
        }
    }
}
