//! Retry policies used by the two connectors.
//!
//! Storage uses a [`RetryPolicy`]: a fixed delay and an attempt ceiling, after
//! which startup fails. The broker uses a [`Backoff`]: doubling delays between
//! a floor and a cap, retried forever.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

// ---

/// Fixed-delay retry with a maximum attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    // ---
    pub max_attempts: u32,
    pub delay: Duration,
}

/// All attempts of a [`RetryPolicy`] failed; carries the last error.
#[derive(Debug, thiserror::Error)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E: std::fmt::Display> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    // ---
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        // At least one attempt is always made
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. The delay is only slept
    /// between attempts, never after the last one.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // ---
        let mut attempt = 1;
        loop {
            tracing::info!("Connecting to {what} (attempt {attempt}/{})", self.max_attempts);
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "{what} not ready, retrying in {}s",
                        self.delay.as_secs_f64()
                    );
                    sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Bounded exponential backoff for reconnect loops without an attempt ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    // ---
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    // ---
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Delay to wait before the next attempt; doubles up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        // ---
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Called after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        // ---
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_backoff_reset() {
        // ---
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_cap_below_floor() {
        // ---
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        // ---
        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        let start = Instant::now();

        let result = policy
            .run("storage", |attempt| async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt} refused"))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        // Two failures, two fixed delays
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget() {
        // ---
        let policy = RetryPolicy::new(3, Duration::from_secs(2));
        let calls = Cell::new(0);
        let start = Instant::now();

        let result: Result<(), _> = policy
            .run("storage", |_| {
                calls.set(calls.get() + 1);
                async { Err("connection refused") }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "connection refused");
        assert_eq!(calls.get(), 3);
        // No sleep after the final attempt
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
