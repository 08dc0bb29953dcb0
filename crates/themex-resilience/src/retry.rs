//! Async retry executor.

use std::fmt::Display;
use std::future::Future;

use metrics::counter;
use themex_core::{RetryPolicy, Retryable};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A call that eventually succeeded.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successful value.
    pub value: T,
    /// Calls made, including the successful one.
    pub attempts: u32,
}

/// A call that gave up.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// The last error observed.
    pub error: E,
    /// Calls made.
    pub attempts: u32,
    /// Gave up because the token was cancelled during a backoff wait.
    pub cancelled: bool,
}

/// Call `f` until it succeeds, fails terminally, or `policy` runs out.
///
/// Waits `min(cap, base * 2^attempt)` with symmetric jitter between calls,
/// or the error's own `retry_after` when it carries one. A function that
/// always fails retryably is called exactly `policy.attempts()` times.
/// Cancellation interrupts backoff waits, never an in-flight call.
pub async fn execute_with_retry<T, E, F, Fut>(
    mut f: F,
    label: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<RetryOutcome<T>, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max = policy.attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let error = match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempts = attempt, "succeeded after retry");
                }
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                });
            }
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= max {
            if error.is_retryable() {
                warn!(label, attempts = attempt, error = %error, "retries exhausted");
            }
            return Err(RetryFailure {
                error,
                attempts: attempt,
                cancelled: false,
            });
        }

        let delay = error
            .retry_after()
            .unwrap_or_else(|| policy.delay_for(attempt - 1, rand::random::<f64>()));
        counter!("themex_retries_total", "label" => label.to_string()).increment(1);
        warn!(
            label,
            attempt,
            max_attempts = max,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying after error"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(RetryFailure { error, attempts: attempt, cancelled: true });
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use themex_core::EngineError;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_factor: 0.2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_retryable_calls_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let res: Result<RetryOutcome<()>, _> = execute_with_retry(
            || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(EngineError::provider(format!("boom {n}"), true))
                }
            },
            "test",
            &policy(4),
            &CancellationToken::new(),
        )
        .await;

        let failure = res.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(failure.attempts, 4);
        assert!(!failure.cancelled);
        assert!(failure.error.to_string().contains("boom 4"));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let res: Result<RetryOutcome<()>, _> = execute_with_retry(
            || {
                let c = c.clone();
                async move {
                    let _ = c.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::Input("bad".into()))
                }
            },
            "test",
            &policy(5),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(res.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_and_reports_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = execute_with_retry(
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(EngineError::provider("flaky", true))
                    } else {
                        Ok("done")
                    }
                }
            },
            "test",
            &policy(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out.value, "done");
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn honours_server_delay() {
        let started = tokio::time::Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let _ = execute_with_retry(
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(EngineError::ResourceExhausted {
                            resource: "x".into(),
                            retry_after: Duration::from_secs(7),
                        })
                    } else {
                        Ok(())
                    }
                }
            },
            "test",
            &policy(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res: Result<RetryOutcome<()>, _> = execute_with_retry(
            || async { Err(EngineError::provider("down", true)) },
            "test",
            &policy(5),
            &cancel,
        )
        .await;
        let failure = res.unwrap_err();
        assert!(failure.cancelled);
        assert_eq!(failure.attempts, 1);
    }
}
