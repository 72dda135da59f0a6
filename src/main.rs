//! DNS forwarding proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client query                ┌──────────────────────────────────────────────┐
//!     ────────────────────────────┼─▶ net::DnsServer (UDP + bounded TCP)         │
//!                                 │        │                                     │
//!                                 │        ▼                                     │
//!                                 │   forward::Forwarder ──▶ tap chain           │
//!                                 │        │                                     │
//!                                 │        ▼                                     │
//!                                 │   load_balancer policy orders the pool       │
//!                                 │        │                                     │
//!                                 │        ▼                                     │
//!     Client reply                │   upstream::Proxy (health, transport) ───────┼──▶ Upstream
//!     ◀───────────────────────────┼─  first answer, SERVFAIL or REFUSED          │    resolver
//!                                 │                                              │
//!                                 │   health::HealthMonitor probes down proxies  │
//!                                 │   config watcher / SIGHUP → Forwarder::reload│
//!                                 └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use dns_forward::config::watcher::ConfigWatcher;
use dns_forward::config::{load_config, ConfigError, ForwardConfig};
use dns_forward::lifecycle::{SignalEvent, Signals};
use dns_forward::load_balancer::PolicyKind;
use dns_forward::observability::{logging, metrics};
use dns_forward::{tap, DnsServer, Forwarder, Shutdown};

#[derive(Parser)]
#[command(name = "dns-forward")]
#[command(about = "DNS forwarding proxy with upstream health checks", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "dns-forward.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Override the configured selection policy
    #[arg(long)]
    policy: Option<PolicyKind>,
}

impl Cli {
    fn apply_overrides(&self, mut config: ForwardConfig) -> ForwardConfig {
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        config
    }

    fn load(&self) -> Result<ForwardConfig, ConfigError> {
        load_config(&self.config).map(|config| self.apply_overrides(config))
    }
}

/// Re-run tap setup from scratch for `config`.
fn install_taps(forwarder: &Forwarder, config: &ForwardConfig) {
    forwarder.reset_taps(config.tap.enabled);
    for sink in tap::build_sinks(&config.tap) {
        forwarder.set_tap_plugin(sink);
    }
    tracing::debug!(taps = forwarder.tap_count(), "Tap chain configured");
}

fn apply_reload(forwarder: &Forwarder, config: &ForwardConfig) {
    match forwarder.reload(config) {
        Ok(()) => install_taps(forwarder, config),
        Err(e) => tracing::error!(error = %e, "Reload rejected, keeping current pool"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    if cli.check {
        println!(
            "{}: ok ({} upstreams, policy {})",
            cli.config.display(),
            config.upstreams.len(),
            config.policy
        );
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dns-forward starting");
    tracing::info!(
        upstreams = ?config.upstreams,
        policy = %config.policy,
        attempt_ms = config.timeouts.attempt_ms,
        max_fails = config.health_check.max_fails,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let forwarder = Arc::new(Forwarder::from_config(&config)?);
    install_taps(&forwarder, &config);
    forwarder.start_health_monitor();

    let shutdown = Shutdown::new();
    let server = DnsServer::bind(&config.listener, forwarder.clone()).await?;
    let server_task = tokio::spawn(server.run(shutdown.subscribe()));

    let (watcher, mut updates) = ConfigWatcher::new(&cli.config);
    let _watcher = match watcher.run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, reload with SIGHUP only");
            None
        }
    };
    let mut signals = Signals::new()?;

    loop {
        tokio::select! {
            Some(new_config) = updates.recv() => {
                apply_reload(&forwarder, &cli.apply_overrides(new_config));
            }
            event = signals.recv() => match event {
                SignalEvent::Reload => match cli.load() {
                    Ok(new_config) => apply_reload(&forwarder, &new_config),
                    Err(e) => tracing::error!(error = %e, "Failed to reload config, keeping current pool"),
                },
                SignalEvent::Shutdown => break,
            },
        }
    }

    tracing::info!("Shutting down");
    shutdown.trigger();
    forwarder.close();
    let _ = server_task.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
