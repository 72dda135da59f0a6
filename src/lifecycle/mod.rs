//! Process lifecycle: signals in, shutdown broadcast out.
//!
//! ```text
//! SIGINT / SIGTERM → SignalEvent::Shutdown → Shutdown::trigger
//!     → DnsServer::run returns, Forwarder::close stops the health monitor
//! SIGHUP → SignalEvent::Reload → config re-read, Forwarder::reload
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{SignalEvent, Signals};
