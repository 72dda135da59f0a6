//! Deadlines for upstream work.
//!
//! Each attempt runs under `timeouts.attempt_ms` and each health probe under
//! `health_check.timeout_ms`. A timed out attempt counts as an upstream
//! failure and the forwarder moves on to the next candidate; the query as a
//! whole is not retried.

pub mod timeouts;
