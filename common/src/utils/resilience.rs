use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

use crate::error::BrainError;

/// Wraps `fut` with a deadline, translating a timeout into
/// `BrainError::Timeout(label)` rather than letting callers match on
/// `tokio::time::error::Elapsed` directly.
pub async fn with_timeout<F, T>(label: &'static str, duration: Duration, fut: F) -> Result<T, BrainError>
where
    F: Future<Output = Result<T, BrainError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(BrainError::Timeout(label)),
    }
}

/// Retries transient-transport failures with exponential backoff capped at
/// `cap_ms`, jittered to avoid thundering-herd retries against SurrealDB/
/// OpenAI. Used at the adapter layer (store/LLM calls), not inside agent
/// reasoning loops, which use `with_agent_retry` instead.
pub async fn with_retry<F, Fut, T>(
    attempts: usize,
    base_ms: u64,
    cap_ms: u64,
    mut operation: F,
) -> Result<T, BrainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrainError>>,
{
    let strategy = ExponentialBackoff::from_millis(base_ms.max(1))
        .factor(1)
        .max_delay(Duration::from_millis(cap_ms))
        .map(jitter)
        .take(attempts.saturating_sub(1));

    let mut attempt = 0usize;
    Retry::spawn(strategy, || {
        attempt += 1;
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(err) if err.is_retryable() => {
                    warn!(attempt, error = %err, "retrying transient failure");
                    Err(err)
                }
                Err(err) => Err(err),
            }
        }
    })
    .await
}

/// Bounded retry for agent reasoning loops (Scout up to 5 attempts,
/// Architect up to 3), which retry on any error rather than only transient
/// ones, since a malformed LLM response is just as worth re-prompting for.
pub async fn with_agent_retry<F, Fut, T>(attempts: usize, mut operation: F) -> Result<T, BrainError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, BrainError>>,
{
    let mut last_err = None;
    for attempt in 1..=attempts.max(1) {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(attempt, error = %err, "agent attempt failed");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or(BrainError::Internal("retry loop ran zero times".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn with_retry_gives_up_on_non_retryable_errors_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), BrainError> = with_retry(5, 1, 10, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BrainError::Validation("bad input".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retry_retries_transient_errors_up_to_attempt_cap() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), BrainError> = with_retry(3, 1, 10, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BrainError::Timeout("db")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_agent_retry_returns_first_success() {
        let result = with_agent_retry(3, |attempt| async move {
            if attempt < 2 {
                Err(BrainError::LlmParsing("malformed json".into()))
            } else {
                Ok(attempt)
            }
        })
        .await
        .expect("should succeed on second attempt");

        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn with_timeout_surfaces_labelled_timeout_error() {
        let result: Result<(), BrainError> =
            with_timeout("slow_op", Duration::from_millis(5), async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(BrainError::Timeout("slow_op"))));
    }
}
