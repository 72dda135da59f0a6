//! Upstream selection policies.
//!
//! # Data Flow
//! ```text
//! Query arrives → forwarder loads current pool
//!     → Policy::list(proxies) produces the candidate order:
//!         - round_robin.rs (rotate the head through the pool)
//!         - random.rs (fresh shuffle per query)
//!         - sequential.rs (configured order, always)
//!     → forwarder tries candidates from index 0
//! ```
//!
//! # Design Decisions
//! - Exactly three policies; no runtime registration
//! - Policies only order; health filtering belongs to the forwarder
//! - The returned list is a fresh copy and always a permutation of the input

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::upstream::Proxy;

pub mod random;
pub mod round_robin;
pub mod sequential;

pub use random::Random;
pub use round_robin::RoundRobin;
pub use sequential::Sequential;

/// Orders the proxies of a pool for one query.
pub trait Policy: Send + Sync + fmt::Debug {
    /// Candidate order for the next query. Same length and members as `proxies`.
    fn list(&self, proxies: &[Arc<Proxy>]) -> Vec<Arc<Proxy>>;

    fn name(&self) -> &'static str;
}

/// Policy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Random,
    RoundRobin,
    Sequential,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Random => "random",
            PolicyKind::RoundRobin => "round_robin",
            PolicyKind::Sequential => "sequential",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unknown policy names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid policy name '{0}' (expected random, round_robin or sequential)")]
pub struct UnknownPolicy(pub String);

impl FromStr for PolicyKind {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(PolicyKind::Random),
            "round_robin" => Ok(PolicyKind::RoundRobin),
            "sequential" => Ok(PolicyKind::Sequential),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// Build a fresh policy instance. Round-robin state starts at zero.
pub fn create_policy(kind: PolicyKind) -> Arc<dyn Policy> {
    match kind {
        PolicyKind::Random => Arc::new(Random::new()),
        PolicyKind::RoundRobin => Arc::new(RoundRobin::new()),
        PolicyKind::Sequential => Arc::new(Sequential::new()),
    }
}
