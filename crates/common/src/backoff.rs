//! Per-component failure gate.
//!
//! A [`BackoffGate`] remembers when a failing component (the source reader or
//! a single sink) may be tried again. Unlike [`retry_async`], it does not own
//! a loop: the caller asks [`ready`](BackoffGate::ready) at the top of each
//! trigger and skips the component until the gate opens.
//!
//! [`retry_async`]: crate::retry::retry_async

use std::time::{Duration, Instant};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct BackoffGate {
    policy: RetryPolicy,
    retry_at: Option<Instant>,
    failures: u32,
}

impl BackoffGate {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retry_at: None,
            failures: 0,
        }
    }

    /// `true` when no backoff is pending or its deadline has passed.
    pub fn ready(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    /// Record a failure and return the wait before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let wait = self.policy.next_backoff();
        self.retry_at = Some(Instant::now() + wait);
        wait
    }

    /// Clear the gate after a successful attempt.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.retry_at = None;
        self.policy.reset();
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Deadline set by the last failure, if any.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }
}
