//! Sequential selection policy.

use std::sync::Arc;

use crate::load_balancer::Policy;
use crate::upstream::Proxy;

/// Always the configured order: the first upstream is primary, the rest
/// are ordered fallbacks.
#[derive(Debug, Default)]
pub struct Sequential;

impl Sequential {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for Sequential {
    fn list(&self, proxies: &[Arc<Proxy>]) -> Vec<Arc<Proxy>> {
        proxies.to_vec()
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}
