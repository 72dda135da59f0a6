//! Ordered telemetry chain.
//!
//! Sinks are stored in registration order. Traversal always starts at the
//! head; each sink receives a [`Next`] handle and decides whether the rest
//! of the chain sees the event.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::dns::Message;
use crate::forward::ForwardError;
use crate::upstream::UpstreamAddr;

/// How a forwarded query ended.
#[derive(Debug, Clone, Copy)]
pub enum TapOutcome<'a> {
    /// An upstream answered.
    Answered {
        upstream: UpstreamAddr,
        response: &'a Message,
    },
    /// No upstream could serve the query.
    Failed { error: &'a ForwardError },
}

/// One completed forward, borrowed for the duration of traversal.
#[derive(Debug, Clone, Copy)]
pub struct TapEvent<'a> {
    pub query: &'a Message,
    pub outcome: TapOutcome<'a>,
    /// Candidates tried, including the one that answered.
    pub attempts: usize,
    pub elapsed: Duration,
    pub timestamp: SystemTime,
}

impl<'a> TapEvent<'a> {
    pub fn response(&self) -> Option<&'a Message> {
        match self.outcome {
            TapOutcome::Answered { response, .. } => Some(response),
            TapOutcome::Failed { .. } => None,
        }
    }

    pub fn upstream(&self) -> Option<UpstreamAddr> {
        match self.outcome {
            TapOutcome::Answered { upstream, .. } => Some(upstream),
            TapOutcome::Failed { .. } => None,
        }
    }

    /// Owned copy for sinks that hand events to another task.
    pub fn to_record(&self) -> TapRecord {
        let error = match self.outcome {
            TapOutcome::Failed { error } => Some(error.to_string()),
            TapOutcome::Answered { .. } => None,
        };
        TapRecord {
            query: self.query.clone(),
            response: self.response().cloned(),
            upstream: self.upstream(),
            error,
            attempts: self.attempts,
            elapsed: self.elapsed,
            timestamp: self.timestamp,
        }
    }
}

/// Owned form of a [`TapEvent`].
#[derive(Debug, Clone)]
pub struct TapRecord {
    pub query: Message,
    pub response: Option<Message>,
    pub upstream: Option<UpstreamAddr>,
    pub error: Option<String>,
    pub attempts: usize,
    pub elapsed: Duration,
    pub timestamp: SystemTime,
}

/// A telemetry sink.
///
/// `tap` runs on the query path and must not block; sinks doing I/O should
/// hand the event off (see [`super::ChannelSink`]).
pub trait TapSink: Send + Sync {
    fn name(&self) -> &str;

    /// Observe `event`. Call `next.run(event)` to pass it down the chain.
    fn tap(&self, event: &TapEvent<'_>, next: Next<'_>);
}

/// The remainder of the chain after the current sink.
pub struct Next<'a> {
    rest: &'a [Arc<dyn TapSink>],
}

impl Next<'_> {
    /// Hand the event to the next sink, if any.
    pub fn run(self, event: &TapEvent<'_>) {
        if let Some((head, rest)) = self.rest.split_first() {
            head.tap(event, Next { rest });
        }
    }

    /// Number of sinks after the current one.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

/// Sinks in registration order.
#[derive(Clone, Default)]
pub struct TapChain {
    sinks: Vec<Arc<dyn TapSink>>,
}

impl TapChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of this chain with `sink` appended at the tail.
    pub fn with(&self, sink: Arc<dyn TapSink>) -> Self {
        let mut sinks = self.sinks.clone();
        sinks.push(sink);
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn TapSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn sinks(&self) -> &[Arc<dyn TapSink>] {
        &self.sinks
    }

    pub fn head(&self) -> Option<&Arc<dyn TapSink>> {
        self.sinks.first()
    }

    /// The sink linked after position `index`; `None` for the tail.
    pub fn next_of(&self, index: usize) -> Option<&Arc<dyn TapSink>> {
        self.sinks.get(index.checked_add(1)?)
    }

    /// Start traversal at the head.
    pub fn offer(&self, event: &TapEvent<'_>) {
        Next { rest: &self.sinks }.run(event);
    }
}

impl fmt::Debug for TapChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sinks.iter().map(|s| s.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::Rcode;
    use std::sync::Mutex;

    /// Records its name into a shared log, optionally stopping the chain.
    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        propagate: bool,
    }

    impl TapSink for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn tap(&self, event: &TapEvent<'_>, next: Next<'_>) {
            self.log.lock().unwrap().push(self.name.clone());
            if self.propagate {
                next.run(event);
            }
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>, propagate: bool) -> Arc<dyn TapSink> {
        Arc::new(Recorder {
            name: name.to_string(),
            log: log.clone(),
            propagate,
        })
    }

    fn offer(chain: &TapChain) {
        let query = Message::health_probe(1, true);
        let response = Message::reply_with_rcode(&query, Rcode::NOERROR);
        chain.offer(&TapEvent {
            query: &query,
            outcome: TapOutcome::Answered {
                upstream: "127.0.0.1:53".parse().unwrap(),
                response: &response,
            },
            attempts: 1,
            elapsed: Duration::from_millis(3),
            timestamp: SystemTime::now(),
        });
    }

    #[test]
    fn test_order_matches_registration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let t1 = recorder("t1", &log, true);
        let t2 = recorder("t2", &log, true);

        let chain = TapChain::new().with(t1.clone()).with(t2.clone());
        assert_eq!(chain.len(), 2);
        assert!(Arc::ptr_eq(chain.head().unwrap(), &t1));
        assert!(Arc::ptr_eq(chain.next_of(0).unwrap(), &t2));
        assert!(chain.next_of(1).is_none());

        offer(&chain);
        assert_eq!(*log.lock().unwrap(), vec!["t1", "t2"]);
    }

    #[test]
    fn test_sink_can_stop_propagation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = TapChain::new();
        chain.push(recorder("a", &log, true));
        chain.push(recorder("b", &log, false));
        chain.push(recorder("c", &log, true));

        offer(&chain);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_chain_is_noop() {
        let chain = TapChain::new();
        assert!(chain.is_empty());
        assert!(chain.head().is_none());
        offer(&chain);
        assert_eq!(format!("{:?}", chain), "[]");
    }

    #[test]
    fn test_record_copies_outcome() {
        let query = Message::health_probe(9, true);
        let response = Message::reply_with_rcode(&query, Rcode::NXDOMAIN);
        let event = TapEvent {
            query: &query,
            outcome: TapOutcome::Answered {
                upstream: "10.0.0.1:53".parse().unwrap(),
                response: &response,
            },
            attempts: 2,
            elapsed: Duration::from_millis(10),
            timestamp: SystemTime::now(),
        };

        let record = event.to_record();
        assert_eq!(record.response.unwrap().rcode(), Rcode::NXDOMAIN);
        assert_eq!(record.upstream.unwrap().to_string(), "udp://10.0.0.1:53");
        assert!(record.error.is_none());
        assert_eq!(record.attempts, 2);
    }
}
