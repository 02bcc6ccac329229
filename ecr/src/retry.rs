use std::future::Future;
use std::time::Duration;

use ecr_driver::DriverError;

/// A policy for retrying throttled registry calls with exponential backoff.
///
/// Nothing in this crate retries unless a caller provides a `Backoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// The initial delay for the backoff
    pub delay: Duration,

    /// The exponent to increase the delay by
    pub exponent: u32,

    /// The maximum delay for the backoff
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(200),
            exponent: 2,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Create a new backoff policy.
    pub fn new(delay: Duration, exponent: u32, max_delay: Duration) -> Self {
        Self {
            delay,
            exponent,
            max_delay,
        }
    }

    /// Increment the backoff delay, or `None` once the maximum delay is reached.
    ///
    /// A delay which would not grow (zero delay, or an exponent below 2) also
    /// returns `None`, so every backoff gives up eventually.
    pub fn increment(&self) -> Option<Self> {
        let delay = self.delay.checked_mul(self.exponent)?;

        if delay <= self.delay || delay >= self.max_delay {
            return None;
        }

        Some(Self {
            delay,
            exponent: self.exponent,
            max_delay: self.max_delay,
        })
    }

    /// Run `call`, sleeping and trying again while it fails with an error
    /// whose kind [is retryable](ecr_driver::DriverErrorKind::is_retryable). The last
    /// error is returned once the delays run out.
    pub async fn retry<T, F, Fut>(&self, mut call: F) -> Result<T, DriverError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let mut backoff = Some(self.clone());
        loop {
            match call().await {
                Err(error) if error.is_retryable() => {
                    let Some(current) = backoff else {
                        tracing::warn!("giving up after repeated errors: {error}");
                        return Err(error);
                    };

                    tracing::warn!(delay = ?current.delay, "retrying registry call: {error}");
                    tokio::time::sleep(current.delay).await;
                    backoff = current.increment();
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ecr_driver::DriverErrorKind;

    use super::*;

    fn throttled() -> DriverError {
        DriverError::new("test", DriverErrorKind::Throttled, "slow down")
    }

    #[test]
    fn increments_until_max_delay() {
        let backoff = Backoff::new(Duration::from_secs(1), 2, Duration::from_secs(5));
        let second = backoff.increment().unwrap();
        assert_eq!(second.delay, Duration::from_secs(2));
        let third = second.increment().unwrap();
        assert_eq!(third.delay, Duration::from_secs(4));
        assert!(third.increment().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_throttled_calls() {
        let calls = AtomicUsize::new(0);
        let backoff = Backoff::default();

        let result = backoff
            .retry(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(throttled())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_eventually() {
        let calls = AtomicUsize::new(0);
        let backoff = Backoff::new(Duration::from_secs(1), 2, Duration::from_secs(3));

        let error = backoff
            .retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(throttled()) }
            })
            .await
            .unwrap_err();

        assert_eq!(error.kind(), DriverErrorKind::Throttled);
        // 1s, 2s, then the next delay would reach the maximum.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let error = Backoff::default()
            .retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(DriverError::new(
                        "test",
                        DriverErrorKind::PermissionDenied,
                        "denied",
                    ))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(error.kind(), DriverErrorKind::PermissionDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_which_do_not_grow_stop() {
        let flat = Backoff::new(Duration::from_millis(100), 1, Duration::from_secs(10));
        assert!(flat.increment().is_none());

        let zero = Backoff::new(Duration::ZERO, 2, Duration::from_secs(10));
        assert!(zero.increment().is_none());

        let vanishing = Backoff::new(Duration::from_millis(100), 0, Duration::from_secs(10));
        assert!(vanishing.increment().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn constant_backoff_gives_up() {
        let calls = AtomicUsize::new(0);
        let backoff = Backoff::new(Duration::from_millis(100), 1, Duration::from_secs(10));

        let error = backoff
            .retry(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 10_000 {
                        Err(throttled())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap_err();

        assert_eq!(error.kind(), DriverErrorKind::Throttled);
        // One retry at the initial delay, then no further growth is possible.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn io_errors_are_retried() {
        let calls = AtomicUsize::new(0);

        let result = Backoff::default()
            .retry(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(DriverError::new("test", DriverErrorKind::Io, "connection reset"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 1);
    }
}
