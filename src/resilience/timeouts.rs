//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound every upstream attempt and health probe with a deadline
//! - Turn an elapsed deadline into a distinct attempt error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Dropping the timed-out future releases its connection

use std::future::Future;
use std::time::Duration;

use crate::upstream::AttemptError;

/// Run `attempt`, failing with [`AttemptError::Timeout`] if it takes longer than `limit`.
pub async fn with_timeout<F, T>(limit: Duration, attempt: F) -> Result<T, AttemptError>
where
    F: Future<Output = Result<T, AttemptError>>,
{
    match tokio::time::timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => Err(AttemptError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_deadline_is_timeout() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AttemptError::Timeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok = with_timeout(Duration::from_secs(1), async { Ok::<_, AttemptError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<(), _> = with_timeout(Duration::from_secs(1), async {
            Err(AttemptError::NotResponse)
        })
        .await;
        assert!(matches!(err, Err(AttemptError::NotResponse)));
    }
}
