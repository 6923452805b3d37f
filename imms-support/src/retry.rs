//! Every I/O suspension point in this system (object store, queue,
//! CRUD-store, cache, audit-table) has an operation-level deadline; on
//! expiry the operation retries with exponential backoff and full jitter,
//! up to a bounded number of attempts, before surfacing an
//! `Unhandled*Error` (§5). This module is the one place that policy lives.

use backoff::{Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Adds full jitter (0..=interval) on top of the exponential backoff's
    /// chosen interval, per the "full jitter" retry strategy.
    fn jittered(interval: Duration) -> Duration {
        if interval.is_zero() {
            return interval;
        }
        let millis = interval.as_millis().max(1) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }

    /// Runs `op` up to `max_attempts` times, sleeping with jittered
    /// exponential backoff between attempts. Returns the last error once
    /// attempts are exhausted.
    pub async fn retry_async<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = self.backoff();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    match backoff::backoff::Backoff::next_backoff(&mut backoff) {
                        Some(interval) => tokio::time::sleep(Self::jittered(interval)).await,
                        None => return Err(err),
                    }
                }
            }
        }
    }

    /// Synchronous counterpart for the Diesel-backed call sites, which run
    /// on blocking pool threads rather than the async runtime.
    pub fn retry_sync<T, E>(
        &self,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut backoff = self.backoff();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    match backoff::backoff::Backoff::next_backoff(&mut backoff) {
                        Some(interval) => std::thread::sleep(Self::jittered(interval)),
                        None => return Err(err),
                    }
                }
            }
        }
    }
}

/// Adapts a plain retry closure to `backoff`'s permanent/transient error
/// distinction, for call sites that want to stop retrying early on a
/// classified-permanent failure.
pub fn permanent<E>(err: E) -> BackoffError<E> {
    BackoffError::permanent(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
        };
        let attempts = AtomicU32::new(0);

        let result: Result<u32, &'static str> = policy
            .retry_async(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("not yet")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
        };
        let attempts = AtomicU32::new(0);

        let result: Result<(), &'static str> = policy
            .retry_async(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err("still broken") }
            })
            .await;

        assert_eq!(result, Err("still broken"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
