//! A single reusable retry policy with exponential backoff.
//!
//! Used by the durable-store writes (200 ms, factor 2, 5 attempts) and by the
//! TTS sentence fan-out (1 s, factor 2, 3 retries on 5xx/429/transport).

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor,
        }
    }

    /// Runs `operation` until it succeeds, `should_retry` declines, or the
    /// attempt budget is spent. Returns the last error on exhaustion.
    pub async fn run<T, E, Op, Fut, P>(&self, mut operation: Op, should_retry: P) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_retries || !should_retry(&error) {
                        return Err(error);
                    }
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_secs_f64(delay.as_secs_f64() * self.backoff_factor);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), 2.0)
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = fast_policy(3)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(7) }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = fast_policy(3)
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("transient")
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_initial_plus_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = fast_policy(3)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("always") }
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        // 1 initial + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), u16> = fast_policy(3)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(404u16) }
                },
                |status| *status >= 500 || *status == 429,
            )
            .await;
        assert_eq!(result.unwrap_err(), 404);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
