//! Bundled telemetry sinks.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::tap::chain::{Next, TapEvent, TapOutcome, TapRecord, TapSink};

/// Emits one structured log event per forwarded query, then continues.
#[derive(Debug)]
pub struct LogSink {
    label: String,
}

impl LogSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl TapSink for LogSink {
    fn name(&self) -> &str {
        &self.label
    }

    fn tap(&self, event: &TapEvent<'_>, next: Next<'_>) {
        match event.outcome {
            TapOutcome::Answered { upstream, response } => {
                tracing::info!(
                    target: "dns_forward::tap",
                    sink = %self.label,
                    id = event.query.id(),
                    upstream = %upstream,
                    rcode = %response.rcode(),
                    attempts = event.attempts,
                    elapsed_ms = event.elapsed.as_millis() as u64,
                    "Forwarded query"
                );
            }
            TapOutcome::Failed { error } => {
                tracing::info!(
                    target: "dns_forward::tap",
                    sink = %self.label,
                    id = event.query.id(),
                    error = %error,
                    attempts = event.attempts,
                    elapsed_ms = event.elapsed.as_millis() as u64,
                    "Forward failed"
                );
            }
        }
        next.run(event);
    }
}

/// Copies events into a bounded channel for a consumer task, then continues.
///
/// Never waits: when the channel is full or closed the record is dropped
/// and counted.
#[derive(Debug)]
pub struct ChannelSink {
    label: String,
    tx: mpsc::Sender<TapRecord>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new(label: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<TapRecord>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                label: label.into(),
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Records lost to a full or closed channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TapSink for ChannelSink {
    fn name(&self) -> &str {
        &self.label
    }

    fn tap(&self, event: &TapEvent<'_>, next: Next<'_>) {
        if let Err(e) = self.tx.try_send(event.to_record()) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(sink = %self.label, dropped = total, error = %e, "Tap record dropped");
        }
        next.run(event);
    }
}
