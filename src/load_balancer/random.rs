//! Random selection policy.

use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::load_balancer::Policy;
use crate::upstream::Proxy;

/// Uniformly random permutation per query. Holds no state.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for Random {
    fn list(&self, proxies: &[Arc<Proxy>]) -> Vec<Arc<Proxy>> {
        let mut list = proxies.to_vec();
        if list.len() > 1 {
            list.shuffle(&mut rand::thread_rng());
        }
        list
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
