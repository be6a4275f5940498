//! Fixed-interval readiness polling for long-running server jobs
//!
//! Snapshot exports are asynchronous on the server side: the client asks for
//! an export and then has to keep checking until the job reports it is done.
//! This crate owns that loop. It checks at a constant interval and gives up
//! once the configured window has elapsed. Permanent failures end the loop
//! immediately and are never retried.

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Default time between two readiness checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default overall window for a job to become ready (30 checks of 5 seconds)
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(150);

/// Errors returned by [`poll_until_ready`]
#[derive(Error, Debug)]
pub enum PollError<E> {
    #[error("Operation '{operation}' not ready after {waited:?} (last state: {last_state})")]
    TimedOut {
        operation: &'static str,
        waited: Duration,
        last_state: String,
    },
    #[error("Operation '{operation}' failed: {error}")]
    Failed { operation: &'static str, error: E },
}

impl<E> PollError<E> {
    /// Returns true when the window elapsed without the job becoming ready
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::TimedOut { .. })
    }
}

/// Outcome of a single readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T> {
    /// The job finished and produced a value
    Ready(T),
    /// The job is still running; the string describes its current state
    Pending(String),
}

/// Interval and overall window for a readiness poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Constant-interval backoff bounded by the policy's timeout
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.interval)
            .with_max_interval(self.interval)
            .with_multiplier(1.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(Some(self.timeout))
            .build()
    }

    /// Upper bound on the number of checks performed under this policy
    pub fn max_checks(&self) -> u64 {
        if self.interval.is_zero() {
            return 1;
        }
        (self.timeout.as_millis() / self.interval.as_millis()).max(1) as u64 + 1
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT)
    }
}

enum Attempt<E> {
    NotReady(String),
    Failed(E),
}

/// Run `check` until it reports [`Readiness::Ready`], it fails, or the
/// policy's window elapses.
///
/// The first check runs immediately. A check returning `Err` stops the loop
/// and is surfaced as [`PollError::Failed`].
pub async fn poll_until_ready<F, Fut, T, E>(
    operation: &'static str,
    policy: PollPolicy,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness<T>, E>>,
{
    let started = Instant::now();
    let mut attempt = 0u64;

    let outcome = backoff::future::retry(policy.to_backoff(), || {
        attempt += 1;
        let current = attempt;
        let pending = check();
        async move {
            match pending.await {
                Ok(Readiness::Ready(value)) => {
                    debug!("Operation '{}' ready after {} checks", operation, current);
                    Ok(value)
                }
                Ok(Readiness::Pending(state)) => {
                    debug!(
                        "Operation '{}' not ready on check {} (state: {})",
                        operation, current, state
                    );
                    Err(backoff::Error::transient(Attempt::NotReady(state)))
                }
                Err(err) => {
                    warn!("Operation '{}' failed on check {}", operation, current);
                    Err(backoff::Error::permanent(Attempt::Failed(err)))
                }
            }
        }
    })
    .await;

    match outcome {
        Ok(value) => Ok(value),
        Err(Attempt::NotReady(last_state)) => {
            let waited = started.elapsed();
            warn!(
                "Operation '{}' still pending after {:?}, giving up",
                operation, waited
            );
            Err(PollError::TimedOut {
                operation,
                waited,
                last_state,
            })
        }
        Err(Attempt::Failed(error)) => Err(PollError::Failed { operation, error }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(10), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_ready_on_first_check() {
        let result: Result<&str, PollError<std::io::Error>> =
            poll_until_ready("test_op", fast_policy(), || async {
                Ok(Readiness::Ready("done"))
            })
            .await;

        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_pending_then_ready() {
        let checks = Arc::new(AtomicUsize::new(0));
        let checks_clone = Arc::clone(&checks);

        let result: Result<u32, PollError<std::io::Error>> =
            poll_until_ready("test_op", fast_policy(), move || {
                let count = checks_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Ok(Readiness::Pending("running".to_string()))
                    } else {
                        Ok(Readiness::Ready(42))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_when_never_ready() {
        let policy = PollPolicy::new(Duration::from_millis(20), Duration::from_millis(100));

        let result: Result<(), PollError<std::io::Error>> =
            poll_until_ready("export", policy, || async {
                Ok(Readiness::Pending("started".to_string()))
            })
            .await;

        match result {
            Err(PollError::TimedOut {
                operation,
                waited,
                last_state,
            }) => {
                assert_eq!(operation, "export");
                assert_eq!(last_state, "started");
                assert!(waited >= Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_stops_polling() {
        let checks = Arc::new(AtomicUsize::new(0));
        let checks_clone = Arc::clone(&checks);

        let result: Result<(), PollError<std::io::Error>> =
            poll_until_ready("test_op", fast_policy(), move || {
                checks_clone.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "permission denied",
                    ))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(checks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_checks() {
        let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(150));
        assert_eq!(policy.max_checks(), 31);

        let policy = PollPolicy::new(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(policy.max_checks(), 2);
    }

    #[test]
    fn test_default_policy() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(policy.timeout, DEFAULT_POLL_TIMEOUT);
    }
}
