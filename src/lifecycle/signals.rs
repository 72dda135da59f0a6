//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers config reload, not shutdown

use std::io;

/// What the process should do in response to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Shutdown,
    Reload,
}

#[cfg(unix)]
pub use unix::Signals;

#[cfg(not(unix))]
pub use fallback::Signals;

#[cfg(unix)]
mod unix {
    use super::*;
    use tokio::signal::unix::{signal, Signal, SignalKind};

    /// Registered process signal streams.
    pub struct Signals {
        interrupt: Signal,
        terminate: Signal,
        hangup: Signal,
    }

    impl Signals {
        pub fn new() -> io::Result<Self> {
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }

        /// Wait for the next signal of interest.
        pub async fn recv(&mut self) -> SignalEvent {
            tokio::select! {
                _ = self.interrupt.recv() => {
                    tracing::info!("Received SIGINT");
                    SignalEvent::Shutdown
                }
                _ = self.terminate.recv() => {
                    tracing::info!("Received SIGTERM");
                    SignalEvent::Shutdown
                }
                _ = self.hangup.recv() => {
                    tracing::info!("Received SIGHUP");
                    SignalEvent::Reload
                }
            }
        }
    }
}

#[cfg(not(unix))]
mod fallback {
    use super::*;

    /// Ctrl-C only; reload is unavailable.
    pub struct Signals;

    impl Signals {
        pub fn new() -> io::Result<Self> {
            Ok(Self)
        }

        pub async fn recv(&mut self) -> SignalEvent {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            SignalEvent::Shutdown
        }
    }
}
