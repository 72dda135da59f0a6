//! Round-robin selection policy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::Policy;
use crate::upstream::Proxy;

/// Round-robin selector.
///
/// Each call advances a shared counter and swaps the proxy at
/// `counter % len` into the head position. Only the head moves; the rest
/// keep their configured order as fallbacks. Once per full cycle the index
/// is zero and the list comes back unchanged.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Policy for RoundRobin {
    fn list(&self, proxies: &[Arc<Proxy>]) -> Vec<Arc<Proxy>> {
        let mut list = proxies.to_vec();
        if list.is_empty() {
            return list;
        }

        // fetch_add wraps on overflow
        let count = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let index = count % list.len();
        if index != 0 {
            list.swap(0, index);
        }
        list
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
