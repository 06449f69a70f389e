//! Bounded retry for connection establishment.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::Result;

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay every time.
    Fixed,
    /// Doubling delay, capped at `max`.
    Exponential {
        /// Upper bound on a single delay.
        max: Duration,
    },
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub delay: Duration,
    /// Delay growth.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Returns the delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(max)
            }
        }
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or
    /// the attempts run out. The last error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < attempts && e.is_transient() => {
                    let delay = self.delay_after(attempt);
                    warn!(label, attempt, max_attempts = attempts, error = %e, ?delay, "attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::Error;

    fn flaky() -> Error {
        Error::Timeout(Duration::from_secs(1))
    }

    #[test]
    fn test_delay_after() {
        let fixed = RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_secs(8),
            backoff: Backoff::Fixed,
        };
        assert_eq!(fixed.delay_after(4), Duration::from_secs(8));

        let exp = RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            backoff: Backoff::Exponential {
                max: Duration::from_secs(5),
            },
        };
        assert_eq!(exp.delay_after(1), Duration::from_secs(1));
        assert_eq!(exp.delay_after(3), Duration::from_secs(4));
        assert_eq!(exp.delay_after(4), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_secs(8),
            backoff: Backoff::Fixed,
        };

        let value = policy
            .run("connect", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { if attempt < 3 { Err(flaky()) } else { Ok(attempt) } }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
            backoff: Backoff::Fixed,
        };

        let result: Result<()> = policy
            .run("connect", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(flaky()) }
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy {
            max_attempts: 5,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
        .run("store", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Config("bad url".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
