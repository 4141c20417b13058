//! Bounded fixed-interval polling for hypervisor state transitions.
//!
//! Hypervisor transitions do not always complete with the call that starts
//! them, so every mutation is driven as an operation that is polled until it
//! reports the desired state or the deadline passes.

use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{NetworkError, Result};

/// Default deadline for a single retried operation.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause between attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Outcome of one attempt. Fatal failures are returned as `Err`.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The desired state was reached.
    Ready(T),
    /// Not there yet; try again after the interval.
    Retry(NetworkError),
}

/// Deadline and polling interval for retried operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wall-clock budget for the whole loop
    pub timeout: Duration,
    /// Constant pause between attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RETRY_TIMEOUT,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given deadline and interval.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Same interval, different deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `op` until it returns [`Attempt::Ready`], a fatal error, or the
    /// deadline elapses.
    ///
    /// The operation is always attempted at least once. On exhaustion the
    /// returned [`NetworkError::RetryExhausted`] wraps the last retryable
    /// error. A timeout too large to represent as an instant never expires.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<Attempt<T>>,
    {
        let deadline = Instant::now().checked_add(self.timeout);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let last = match op()? {
                Attempt::Ready(value) => {
                    debug!(operation, attempts, "Operation completed");
                    return Ok(value);
                }
                Attempt::Retry(err) => err,
            };

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(NetworkError::RetryExhausted {
                            operation: operation.to_string(),
                            timeout: self.timeout,
                            attempts,
                            source: Box::new(last),
                        });
                    }
                    self.interval.min(deadline - now)
                }
                None => self.interval,
            };

            trace!(operation, attempts, error = %last, "Will retry");
            thread::sleep(pause);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(60), Duration::from_millis(5))
    }

    #[test]
    fn test_ready_on_first_attempt() {
        let mut calls = 0;
        let value = fast()
            .run("first", || {
                calls += 1;
                Ok(Attempt::Ready(42))
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_ready_after_retries() {
        let mut calls = 0;
        fast()
            .run("eventually", || {
                calls += 1;
                if calls < 3 {
                    Ok(Attempt::Retry(NetworkError::Internal("not yet".to_string())))
                } else {
                    Ok(Attempt::Ready(()))
                }
            })
            .unwrap();
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_exhaustion_wraps_last_error() {
        let mut calls = 0;
        let started = Instant::now();
        let err = fast()
            .run("never", || {
                calls += 1;
                Ok::<Attempt<()>, _>(Attempt::Retry(NetworkError::Internal(format!(
                    "attempt {}",
                    calls
                ))))
            })
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(60));
        match err {
            NetworkError::RetryExhausted { operation, attempts, source, .. } => {
                assert_eq!(operation, "never");
                assert_eq!(attempts, calls);
                assert!(attempts > 1);
                assert_eq!(source.to_string(), format!("Internal error: attempt {}", calls));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fatal_error_stops_immediately() {
        let mut calls = 0;
        let err = fast()
            .run("fatal", || {
                calls += 1;
                Err::<Attempt<()>, _>(NetworkError::NameCollision("default".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, NetworkError::NameCollision(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unrepresentable_timeout_never_expires() {
        let policy = RetryPolicy::new(Duration::MAX, Duration::from_millis(1));
        assert_eq!(policy.run("huge", || Ok(Attempt::Ready(1))).unwrap(), 1);

        let mut calls = 0;
        policy
            .run("huge", || {
                calls += 1;
                if calls < 3 {
                    Ok(Attempt::Retry(NetworkError::Internal("not yet".to_string())))
                } else {
                    Ok(Attempt::Ready(()))
                }
            })
            .unwrap();
        assert_eq!(calls, 3);

        let policy = RetryPolicy::new(Duration::from_secs(u64::MAX), Duration::from_millis(1));
        assert_eq!(policy.run("huge", || Ok(Attempt::Ready(2))).unwrap(), 2);
    }
}
