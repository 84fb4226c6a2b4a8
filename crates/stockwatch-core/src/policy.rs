//! Request pacing: randomised inter-batch delays and linear retry backoff.
//!
//! The site rate-limits aggressive polling, so delays are drawn at random
//! rather than fixed, and retries stay few and linear.

use std::time::Duration;

use rand_core::{OsRng, RngCore};

/// Uniform integer in `[lo, hi]` (bounds swapped if reversed).
fn uniform(lo: u64, hi: u64) -> u64 {
  let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
  let span = hi - lo;
  if span == u64::MAX {
    return OsRng.next_u64();
  }
  lo + OsRng.next_u64() % (span + 1)
}

/// A whole number of seconds drawn uniformly from `[min_secs, max_secs]`.
pub fn random_delay(min_secs: u64, max_secs: u64) -> Duration {
  Duration::from_secs(uniform(min_secs, max_secs))
}

/// Pause between tracking batches: 1–3 seconds, millisecond resolution.
pub fn tracking_batch_delay() -> Duration {
  Duration::from_millis(uniform(1_000, 2_999))
}

/// Retry behaviour for a single URL check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Retries after the first attempt; total attempts are `max_retries + 1`.
  pub max_retries: u32,
  /// Backoff grows by this much per attempt.
  pub step:        Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self { max_retries: 2, step: Duration::from_secs(1) }
  }
}

impl RetryPolicy {
  pub fn new(max_retries: u32) -> Self { Self { max_retries, ..Self::default() } }

  /// Wait before retry number `attempt + 1`: `step * (attempt + 1)`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    self.step.saturating_mul(attempt.saturating_add(1))
  }

  pub fn should_retry(&self, attempt: u32) -> bool { attempt < self.max_retries }
}
