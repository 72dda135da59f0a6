//! Forwarding errors.

/// Outcome of a query that no upstream could serve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    /// Every candidate was tried and none produced an answer.
    #[error("all {attempts} upstream attempts failed, last error: {last_error}")]
    Exhausted { attempts: usize, last_error: String },

    /// Every upstream is marked down and fail-fast is enabled.
    #[error("no healthy upstream")]
    NoHealthyUpstream,

    /// The concurrency limit was reached before any upstream was contacted.
    #[error("concurrent query limit reached")]
    LimitExceeded,

    /// The caller's deadline elapsed before the forward completed.
    #[error("forward deadline exceeded")]
    DeadlineExceeded,
}

impl ForwardError {
    /// Metric/log label.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::Exhausted { .. } => "exhausted",
            ForwardError::NoHealthyUpstream => "no_healthy_upstream",
            ForwardError::LimitExceeded => "limit_exceeded",
            ForwardError::DeadlineExceeded => "deadline_exceeded",
        }
    }
}
