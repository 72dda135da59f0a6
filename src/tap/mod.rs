//! Telemetry chain.
//!
//! # Data Flow
//! ```text
//! Forwarder completes a query (answer or aggregate failure)
//!     → TapEvent borrowed from the query path
//!     → chain.rs offers it to the head sink
//!     → each sink calls next.run(event) to continue
//!     → sinks.rs: LogSink (tracing), ChannelSink (bounded mpsc)
//! ```
//!
//! # Design Decisions
//! - The chain is an explicit ordered Vec; order equals registration order
//! - Sinks run inline on the query path and must not block
//! - The chain is swapped as a whole, never mutated while shared

pub mod chain;
pub mod sinks;

use std::sync::Arc;

pub use chain::{Next, TapChain, TapEvent, TapOutcome, TapRecord, TapSink};
pub use sinks::{ChannelSink, LogSink};

use crate::config::{TapConfig, TapSinkConfig};

/// Instantiate the sinks declared in configuration, in declaration order.
pub fn build_sinks(config: &TapConfig) -> Vec<Arc<dyn TapSink>> {
    config
        .sinks
        .iter()
        .map(|sink| match sink {
            TapSinkConfig::Log { label } => Arc::new(LogSink::new(label.clone())) as Arc<dyn TapSink>,
        })
        .collect()
}
