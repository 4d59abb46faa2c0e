//! Shared building blocks for tierforge crates.
//!
//! [`retry`] bounds every store and checkpoint call with a deadline, and
//! retries commits with backoff. [`BackoffGate`] carries that backoff across
//! triggers for a component that keeps failing.

pub mod backoff;
pub mod retry;

pub use backoff::BackoffGate;
pub use retry::{RetryOutcome, RetryPolicy, Retryable, retry_async, watchdog};
