//! Bounded waits for store and checkpoint I/O.
//!
//! [`retry_async`] repeats an idempotent write until it lands, fails
//! permanently or runs out of attempts. [`watchdog`] runs a single read
//! under a deadline. Both stop early when the engine's cancellation token
//! fires and hand the caller's own error type back through [`RetryOutcome`].

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a guarded operation did not produce a value.
#[derive(Debug)]
pub enum RetryOutcome<E> {
    Cancelled,
    /// The deadline passed; for retries, on every attempt made.
    Timeout { action: Cow<'static, str> },
    /// Attempt budget spent on retryable errors.
    Exhausted { attempts: u32, last_error: E },
    /// Rejected as permanent by the caller's predicate.
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for RetryOutcome<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::Timeout { action } => write!(f, "{action} timed out"),
            Self::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for RetryOutcome<E> {}

impl<E> RetryOutcome<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn timeout(label: &str) -> Self {
        Self::Timeout {
            action: Cow::Owned(label.to_owned()),
        }
    }
}

/// Doubling backoff, capped at `max`, with optional `±jitter`.
///
/// ```
/// use common::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let mut policy = RetryPolicy::fixed(
///     Duration::from_millis(100),
///     Duration::from_millis(250),
///     Some(3),
/// );
/// assert_eq!(policy.next_backoff(), Duration::from_millis(100));
/// assert_eq!(policy.next_backoff(), Duration::from_millis(200));
/// assert_eq!(policy.next_backoff(), Duration::from_millis(250));
/// ```
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Fraction in `0.0..=1.0`.
    pub jitter: f64,
    /// Retries allowed after the first attempt; `None` keeps going until
    /// cancelled.
    pub max_retries: Option<u32>,
    next: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_millis(100, 10_000, Some(5))
    }
}

impl RetryPolicy {
    pub fn new(
        initial: Duration,
        max: Duration,
        jitter: f64,
        max_retries: Option<u32>,
    ) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: jitter.clamp(0.0, 1.0),
            max_retries,
            next: initial,
        }
    }

    /// Policy from the `retry` block of an engine spec, with 20% jitter.
    pub fn from_millis(
        initial_ms: u64,
        max_ms: u64,
        max_retries: Option<u32>,
    ) -> Self {
        Self::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
            0.2,
            max_retries,
        )
    }

    /// Deterministic policy without jitter.
    pub fn fixed(
        initial: Duration,
        max: Duration,
        max_retries: Option<u32>,
    ) -> Self {
        Self::new(initial, max, 0.0, max_retries)
    }

    /// Wait before the next attempt. Advances the schedule.
    pub fn next_backoff(&mut self) -> Duration {
        let base = self.next;
        self.next = base.saturating_mul(2).min(self.max);
        if self.jitter == 0.0 {
            return base;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..self.jitter);
        base.mul_f64(factor).max(Duration::from_nanos(1))
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }

    /// Whether the 1-indexed `retry` is still within budget.
    pub fn should_retry(&self, retry: u32) -> bool {
        self.max_retries.is_none_or(|max| retry <= max)
    }
}

/// Transient vs permanent classification for store errors.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Sleep for `wait` unless `cancel` fires first. Returns `false` on cancel.
async fn pause(wait: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(wait) => true,
    }
}

/// Run `op` until it succeeds, backing off between attempts.
///
/// `op` gets the 1-indexed attempt number and must be safe to repeat. The
/// first attempt always runs; `policy.max_retries` bounds the ones after it.
/// `cancel` is only observed between attempts, never inside one, so a write
/// that has started is allowed to finish. An attempt that exceeds
/// `attempt_timeout` is retried like a transient error.
pub async fn retry_async<T, E, Fut, Op, IsRetryable>(
    mut op: Op,
    is_retryable: IsRetryable,
    attempt_timeout: Duration,
    mut policy: RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
) -> Result<T, RetryOutcome<E>>
where
    E: fmt::Display,
    Fut: Future<Output = Result<T, E>>,
    Op: FnMut(u32) -> Fut,
    IsRetryable: Fn(&E) -> bool,
{
    let mut last_error = None;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(RetryOutcome::Cancelled);
        }
        if attempt > 1 && !policy.should_retry(attempt - 1) {
            return Err(match last_error {
                Some(last_error) => RetryOutcome::Exhausted {
                    attempts: attempt - 1,
                    last_error,
                },
                None => RetryOutcome::timeout(label),
            });
        }

        let wait = match timeout(attempt_timeout, op(attempt)).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) if !is_retryable(&e) => {
                warn!(label, attempt, error = %e, "permanent failure");
                return Err(RetryOutcome::Failed(e));
            }
            Ok(Err(e)) => {
                let wait = policy.next_backoff();
                warn!(
                    label,
                    attempt,
                    error = %e,
                    backoff_ms = wait.as_millis() as u64,
                    "attempt failed"
                );
                last_error = Some(e);
                wait
            }
            Err(_) => {
                let wait = policy.next_backoff();
                warn!(
                    label,
                    attempt,
                    timeout_ms = attempt_timeout.as_millis() as u64,
                    backoff_ms = wait.as_millis() as u64,
                    "attempt timed out"
                );
                wait
            }
        };

        if !pause(wait, cancel).await {
            return Err(RetryOutcome::Cancelled);
        }
    }
}

/// Run `op` once under `limit`.
///
/// Meant for reads, which have no side effects: the future is dropped as
/// soon as `cancel` fires.
pub async fn watchdog<T, E, Fut>(
    op: Fut,
    limit: Duration,
    cancel: &CancellationToken,
    label: &str,
) -> Result<T, RetryOutcome<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RetryOutcome::Cancelled),
        res = timeout(limit, op) => match res {
            Ok(res) => res.map_err(RetryOutcome::Failed),
            Err(_) => Err(RetryOutcome::timeout(label)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::{Ready, ready};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum StoreErr {
        Busy,
        Conflict,
    }

    impl fmt::Display for StoreErr {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Busy => f.write_str("store busy"),
                Self::Conflict => f.write_str("schema conflict"),
            }
        }
    }

    impl Retryable for StoreErr {
        fn is_retryable(&self) -> bool {
            matches!(self, StoreErr::Busy)
        }
    }

    fn quick(max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_millis(1),
            Duration::from_millis(5),
            max_retries,
        )
    }

    type Op = Box<dyn FnMut(u32) -> Ready<Result<u32, StoreErr>> + Send>;

    /// An op that fails with `err` for its first `n` calls.
    fn failing_first(n: u32, err: fn() -> StoreErr) -> (Arc<AtomicU32>, Op) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op: Op = Box::new(move |attempt: u32| {
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            ready(if seen < n { Err(err()) } else { Ok(attempt) })
        });
        (calls, op)
    }

    async fn run(
        op: Op,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<u32, RetryOutcome<StoreErr>> {
        retry_async(
            op,
            StoreErr::is_retryable,
            Duration::from_secs(1),
            policy,
            cancel,
            "commit",
        )
        .await
    }

    #[test]
    fn backoff_doubles_up_to_max_and_resets() {
        let mut p = RetryPolicy::fixed(
            Duration::from_secs(1),
            Duration::from_secs(3),
            None,
        );
        let waits: Vec<_> =
            (0..4).map(|_| p.next_backoff().as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 3, 3]);
        p.reset();
        assert_eq!(p.next_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_is_bounded() {
        let mut p = RetryPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            0.5,
            None,
        );
        for _ in 0..100 {
            p.reset();
            let d = p.next_backoff();
            assert!(
                d >= Duration::from_millis(500)
                    && d <= Duration::from_millis(1500),
                "{d:?}"
            );
        }
    }

    #[test]
    fn budget_and_cap_normalisation() {
        let p = RetryPolicy::from_millis(500, 100, Some(1));
        assert_eq!(p.max, Duration::from_millis(500));
        assert!(quick(Some(3)).should_retry(3));
        assert!(!quick(Some(3)).should_retry(4));
        assert!(quick(None).should_retry(u32::MAX));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let (calls, op) = failing_first(2, || StoreErr::Busy);
        let res = run(op, quick(Some(5)), &CancellationToken::new()).await;
        assert_eq!(res.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_stops_immediately() {
        let (calls, op) = failing_first(u32::MAX, || StoreErr::Conflict);
        let res = run(op, quick(None), &CancellationToken::new()).await;
        assert!(matches!(res, Err(RetryOutcome::Failed(StoreErr::Conflict))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_keeps_the_last_error() {
        let (calls, op) = failing_first(u32::MAX, || StoreErr::Busy);
        match run(op, quick(Some(2)), &CancellationToken::new()).await {
            Err(RetryOutcome::Exhausted {
                attempts,
                last_error: StoreErr::Busy,
            }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_retries_makes_exactly_one_attempt() {
        let (calls, op) = failing_first(0, || StoreErr::Busy);
        assert_eq!(
            run(op, quick(Some(0)), &CancellationToken::new()).await.unwrap(),
            1
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (calls, op) = failing_first(u32::MAX, || StoreErr::Busy);
        let err = run(op, quick(Some(0)), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RetryOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn every_attempt_timing_out_reports_timeout() {
        let res: Result<(), RetryOutcome<StoreErr>> = retry_async(
            |_| async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            StoreErr::is_retryable,
            Duration::from_millis(5),
            quick(Some(1)),
            &CancellationToken::new(),
            "slow_commit",
        )
        .await;
        assert_eq!(res.unwrap_err().to_string(), "slow_commit timed out");
    }

    #[tokio::test]
    async fn cancel_is_checked_before_each_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (calls, op) = failing_first(0, || StoreErr::Busy);
        assert!(run(op, quick(None), &cancel).await.unwrap_err().is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_attempt_is_retried() {
        let res: Result<u32, RetryOutcome<StoreErr>> = retry_async(
            |attempt| async move {
                if attempt == 1 {
                    sleep(Duration::from_secs(5)).await;
                }
                Ok(attempt)
            },
            StoreErr::is_retryable,
            Duration::from_millis(20),
            quick(Some(3)),
            &CancellationToken::new(),
            "slow_commit",
        )
        .await;
        assert_eq!(res.unwrap(), 2);
    }

    #[tokio::test]
    async fn watchdog_outcomes() {
        let cancel = CancellationToken::new();
        let limit = Duration::from_secs(1);

        let ok: Result<_, RetryOutcome<StoreErr>> =
            watchdog(async { Ok(7) }, limit, &cancel, "read").await;
        assert_eq!(ok.unwrap(), 7);

        let slow: Result<(), RetryOutcome<StoreErr>> = watchdog(
            async {
                sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Duration::from_millis(10),
            &cancel,
            "read",
        )
        .await;
        let err = slow.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "read timed out");

        let failed: Result<(), _> =
            watchdog(async { Err(StoreErr::Conflict) }, limit, &cancel, "read")
                .await;
        assert!(matches!(failed, Err(RetryOutcome::Failed(StoreErr::Conflict))));

        cancel.cancel();
        let cancelled: Result<(), RetryOutcome<StoreErr>> =
            watchdog(async { Ok(()) }, limit, &cancel, "read").await;
        assert!(cancelled.is_err_and(|e| e.is_cancelled()));
    }
}
